//! Feature extraction backbones
//!
//! A backbone maps a stack of raw samples `[n, ...sample_dims]` to a stack
//! of feature tensors `[n, ...feature_dims]`. Convolutional backbones keep
//! spatial feature maps; the classifier head pools them when scoring.

use ndarray::{Array1, Array2, Array4, ArrayD, IxDyn};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::{FewShotError, Result};

/// Common interface for feature extractors
pub trait Backbone: std::fmt::Debug + Send + Sync {
    /// Registry name of this backbone
    fn name(&self) -> &'static str;

    /// Encode a stack of samples `[n, ...sample_dims]` into features
    /// `[n, ...feature_dims]`
    fn encode(&self, input: &ArrayD<f64>) -> Result<ArrayD<f64>>;
}

/// Build a backbone from its registry name with default settings
pub fn build_backbone(name: &str) -> Result<Box<dyn Backbone>> {
    match name {
        "conv4" => Ok(Box::new(Conv4Encoder::new(ConvConfig::default()))),
        "mlp" => Ok(Box::new(MlpEncoder::new(MlpConfig::default()))),
        "flatten" => Ok(Box::new(FlattenEncoder::new())),
        other => Err(FewShotError::UnknownBackbone(other.to_string())),
    }
}

/// Configuration for the convolutional encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvConfig {
    /// Input image channels
    pub in_channels: usize,
    /// Feature channels produced by every block
    pub hidden_channels: usize,
    /// Number of conv-relu-pool blocks, each halving the spatial extent
    pub num_blocks: usize,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            hidden_channels: 64,
            num_blocks: 4,
        }
    }
}

/// Convolutional encoder with 3x3 kernels, ReLU and 2x2 max pooling
///
/// Produces spatial feature maps `[n, hidden_channels, h / 2^blocks,
/// w / 2^blocks]` rather than flat vectors.
#[derive(Debug, Clone)]
pub struct Conv4Encoder {
    config: ConvConfig,
    /// Per block: kernel `[out_c, in_c, 3, 3]`
    weights: Vec<Array4<f64>>,
    /// Per block: bias `[out_c]`
    biases: Vec<Array1<f64>>,
}

impl Conv4Encoder {
    /// Create an encoder with random Xavier-initialized kernels
    pub fn new(config: ConvConfig) -> Self {
        let mut rng = rand::thread_rng();
        Self::from_rng(config, &mut rng)
    }

    /// Create an encoder with a fixed seed for reproducibility
    pub fn with_seed(config: ConvConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_rng(config, &mut rng)
    }

    fn from_rng<R: Rng>(config: ConvConfig, rng: &mut R) -> Self {
        let mut weights = Vec::with_capacity(config.num_blocks);
        let mut biases = Vec::with_capacity(config.num_blocks);

        for block in 0..config.num_blocks {
            let in_c = if block == 0 {
                config.in_channels
            } else {
                config.hidden_channels
            };
            let out_c = config.hidden_channels;

            // Xavier initialization over the 3x3 receptive field
            let fan_in = (in_c * 9) as f64;
            let fan_out = (out_c * 9) as f64;
            let std = (2.0 / (fan_in + fan_out)).sqrt();
            let normal = Normal::new(0.0, std).unwrap();

            let weight = Array4::from_shape_fn((out_c, in_c, 3, 3), |_| normal.sample(rng));
            weights.push(weight);
            biases.push(Array1::zeros(out_c));
        }

        Self {
            config,
            weights,
            biases,
        }
    }

    /// Minimum input height/width so every pooling stage keeps one pixel
    pub fn min_extent(&self) -> usize {
        1 << self.config.num_blocks
    }

    /// 3x3 convolution with padding 1, keeping the spatial extent
    fn conv3x3(input: &Array4<f64>, weight: &Array4<f64>, bias: &Array1<f64>) -> Array4<f64> {
        let (n, in_c, h, w) = input.dim();
        let out_c = weight.shape()[0];
        let mut out = Array4::zeros((n, out_c, h, w));

        for s in 0..n {
            for oc in 0..out_c {
                for y in 0..h {
                    for x in 0..w {
                        let mut acc = bias[oc];
                        for ic in 0..in_c {
                            for dy in 0..3 {
                                let iy = y + dy;
                                if iy < 1 || iy > h {
                                    continue;
                                }
                                for dx in 0..3 {
                                    let ix = x + dx;
                                    if ix < 1 || ix > w {
                                        continue;
                                    }
                                    acc += weight[[oc, ic, dy, dx]]
                                        * input[[s, ic, iy - 1, ix - 1]];
                                }
                            }
                        }
                        out[[s, oc, y, x]] = acc;
                    }
                }
            }
        }

        out
    }

    /// 2x2 max pooling with stride 2, dropping any odd remainder
    fn max_pool2(input: &Array4<f64>) -> Array4<f64> {
        let (n, c, h, w) = input.dim();
        let (ph, pw) = (h / 2, w / 2);
        let mut out = Array4::zeros((n, c, ph, pw));

        for s in 0..n {
            for ch in 0..c {
                for y in 0..ph {
                    for x in 0..pw {
                        let mut best = f64::NEG_INFINITY;
                        for dy in 0..2 {
                            for dx in 0..2 {
                                best = best.max(input[[s, ch, 2 * y + dy, 2 * x + dx]]);
                            }
                        }
                        out[[s, ch, y, x]] = best;
                    }
                }
            }
        }

        out
    }
}

impl Backbone for Conv4Encoder {
    fn name(&self) -> &'static str {
        "conv4"
    }

    fn encode(&self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let mut x = input
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|_| {
                FewShotError::ShapeMismatch(format!(
                    "conv backbone expects [n, channels, height, width], got {:?}",
                    input.shape()
                ))
            })?;

        let (_, c, h, w) = x.dim();
        if c != self.config.in_channels {
            return Err(FewShotError::ShapeMismatch(format!(
                "conv backbone expects {} input channels, got {}",
                self.config.in_channels, c
            )));
        }
        let min = self.min_extent();
        if h < min || w < min {
            return Err(FewShotError::ShapeMismatch(format!(
                "input extent {}x{} is too small for {} pooling stages (minimum {}x{})",
                h, w, self.config.num_blocks, min, min
            )));
        }

        for block in 0..self.config.num_blocks {
            x = Self::conv3x3(&x, &self.weights[block], &self.biases[block]);
            x.mapv_inplace(|v| v.max(0.0));
            x = Self::max_pool2(&x);
        }

        Ok(x.into_dyn())
    }
}

/// Activation function for the MLP encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    ReLU,
    Tanh,
    Linear,
}

impl Default for Activation {
    fn default() -> Self {
        Self::ReLU
    }
}

impl Activation {
    fn apply(&self, x: &mut Array2<f64>) {
        match self {
            Activation::ReLU => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Tanh => x.mapv_inplace(|v| v.tanh()),
            Activation::Linear => {}
        }
    }
}

/// Configuration for the MLP encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Flattened input dimension of one sample
    pub input_dim: usize,
    /// Hidden layer widths
    pub hidden_dims: Vec<usize>,
    /// Output feature dimension
    pub output_dim: usize,
    /// Activation between layers
    pub activation: Activation,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            input_dim: 32,
            hidden_dims: vec![64],
            output_dim: 64,
            activation: Activation::ReLU,
        }
    }
}

/// Feedforward encoder producing flat feature vectors
///
/// Samples of any rank are flattened to `input_dim` before the first layer.
#[derive(Debug, Clone)]
pub struct MlpEncoder {
    config: MlpConfig,
    /// Per layer: weight `[in_dim, out_dim]`
    weights: Vec<Array2<f64>>,
    /// Per layer: bias `[out_dim]`
    biases: Vec<Array1<f64>>,
}

impl MlpEncoder {
    /// Create an encoder with random Xavier-initialized weights
    pub fn new(config: MlpConfig) -> Self {
        let mut rng = rand::thread_rng();
        Self::from_rng(config, &mut rng)
    }

    /// Create an encoder with a fixed seed for reproducibility
    pub fn with_seed(config: MlpConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_rng(config, &mut rng)
    }

    fn from_rng<R: Rng>(config: MlpConfig, rng: &mut R) -> Self {
        let mut dims = vec![config.input_dim];
        dims.extend(&config.hidden_dims);
        dims.push(config.output_dim);

        let mut weights = Vec::new();
        let mut biases = Vec::new();

        for i in 0..dims.len() - 1 {
            let (in_dim, out_dim) = (dims[i], dims[i + 1]);
            let std = (2.0 / (in_dim + out_dim) as f64).sqrt();
            let normal = Normal::new(0.0, std).unwrap();

            let weight = Array2::from_shape_fn((in_dim, out_dim), |_| normal.sample(rng));
            weights.push(weight);
            biases.push(Array1::zeros(out_dim));
        }

        Self {
            config,
            weights,
            biases,
        }
    }

    /// Output feature dimension
    pub fn output_dim(&self) -> usize {
        self.config.output_dim
    }
}

impl Backbone for MlpEncoder {
    fn name(&self) -> &'static str {
        "mlp"
    }

    fn encode(&self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let n = input.shape().first().copied().unwrap_or(0);
        let flat_dim: usize = input.shape().iter().skip(1).product();

        if input.ndim() < 2 || flat_dim != self.config.input_dim {
            return Err(FewShotError::ShapeMismatch(format!(
                "mlp backbone expects samples flattening to {}, got shape {:?}",
                self.config.input_dim,
                input.shape()
            )));
        }

        let mut x = input
            .to_owned()
            .into_shape((n, flat_dim))
            .map_err(|e| FewShotError::ShapeMismatch(e.to_string()))?;

        // Hidden layers with activation, final layer linear
        for i in 0..self.weights.len() - 1 {
            x = x.dot(&self.weights[i]) + &self.biases[i];
            self.config.activation.apply(&mut x);
        }
        let last = self.weights.len() - 1;
        x = x.dot(&self.weights[last]) + &self.biases[last];

        Ok(x.into_dyn())
    }
}

/// Identity encoder that flattens each sample to a vector
///
/// Parameter-free and deterministic, useful when features are precomputed.
#[derive(Debug, Clone, Default)]
pub struct FlattenEncoder;

impl FlattenEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Backbone for FlattenEncoder {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn encode(&self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        if input.ndim() < 2 {
            return Err(FewShotError::ShapeMismatch(format!(
                "flatten backbone expects [n, ...sample_dims], got shape {:?}",
                input.shape()
            )));
        }
        let n = input.shape()[0];
        let flat_dim: usize = input.shape().iter().skip(1).product();

        input
            .to_owned()
            .into_shape(IxDyn(&[n, flat_dim]))
            .map_err(|e| FewShotError::ShapeMismatch(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_conv_output_shape() {
        let config = ConvConfig {
            in_channels: 1,
            hidden_channels: 4,
            num_blocks: 2,
        };
        let encoder = Conv4Encoder::with_seed(config, 7);

        let input = Array::from_elem(IxDyn(&[3, 1, 8, 8]), 0.5);
        let features = encoder.encode(&input).unwrap();

        assert_eq!(features.shape(), &[3, 4, 2, 2]);
    }

    #[test]
    fn test_conv_output_nonnegative() {
        let config = ConvConfig {
            in_channels: 2,
            hidden_channels: 3,
            num_blocks: 1,
        };
        let encoder = Conv4Encoder::with_seed(config, 3);

        let input = Array::from_shape_fn(IxDyn(&[2, 2, 4, 4]), |idx| {
            (idx[2] as f64 - idx[3] as f64) * 0.3
        });
        let features = encoder.encode(&input).unwrap();

        // Pooled ReLU activations can never be negative
        assert!(features.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_conv_rejects_wrong_channels() {
        let encoder = Conv4Encoder::with_seed(
            ConvConfig {
                in_channels: 3,
                hidden_channels: 4,
                num_blocks: 2,
            },
            1,
        );
        let input = Array::zeros(IxDyn(&[1, 1, 8, 8]));

        assert!(encoder.encode(&input).is_err());
    }

    #[test]
    fn test_conv_rejects_small_input() {
        let encoder = Conv4Encoder::with_seed(
            ConvConfig {
                in_channels: 1,
                hidden_channels: 4,
                num_blocks: 3,
            },
            1,
        );
        assert_eq!(encoder.min_extent(), 8);

        let input = Array::zeros(IxDyn(&[1, 1, 4, 4]));
        assert!(encoder.encode(&input).is_err());
    }

    #[test]
    fn test_mlp_output_shape() {
        let config = MlpConfig {
            input_dim: 8,
            hidden_dims: vec![16],
            output_dim: 4,
            activation: Activation::ReLU,
        };
        let encoder = MlpEncoder::with_seed(config, 11);

        // Samples arrive as 2x4 grids and are flattened to 8
        let input = Array::from_elem(IxDyn(&[5, 2, 4]), 1.0);
        let features = encoder.encode(&input).unwrap();

        assert_eq!(features.shape(), &[5, 4]);
        assert_eq!(encoder.output_dim(), 4);
    }

    #[test]
    fn test_mlp_rejects_wrong_dim() {
        let encoder = MlpEncoder::with_seed(MlpConfig::default(), 11);
        let input = Array::zeros(IxDyn(&[4, 7]));

        assert!(encoder.encode(&input).is_err());
    }

    #[test]
    fn test_flatten_passthrough() {
        let encoder = FlattenEncoder::new();
        let input = Array::from_shape_fn(IxDyn(&[2, 3, 4]), |idx| {
            (idx[0] * 12 + idx[1] * 4 + idx[2]) as f64
        });

        let features = encoder.encode(&input).unwrap();
        assert_eq!(features.shape(), &[2, 12]);
        assert_eq!(features[[0, 0]], 0.0);
        assert_eq!(features[[0, 11]], 11.0);
        assert_eq!(features[[1, 0]], 12.0);
    }

    #[test]
    fn test_registry() {
        assert_eq!(build_backbone("flatten").unwrap().name(), "flatten");
        assert_eq!(build_backbone("mlp").unwrap().name(), "mlp");
        assert_eq!(build_backbone("conv4").unwrap().name(), "conv4");

        let err = build_backbone("resnet12").unwrap_err();
        assert!(matches!(err, FewShotError::UnknownBackbone(_)));
    }

    #[test]
    fn test_seeded_encoders_match() {
        let config = MlpConfig {
            input_dim: 6,
            hidden_dims: vec![8],
            output_dim: 3,
            activation: Activation::Tanh,
        };
        let a = MlpEncoder::with_seed(config.clone(), 99);
        let b = MlpEncoder::with_seed(config, 99);

        let input = Array::from_elem(IxDyn(&[2, 6]), 0.25);
        assert_eq!(a.encode(&input).unwrap(), b.encode(&input).unwrap());
    }
}
