//! Network components for episodic few-shot classification
//!
//! This module provides:
//! - Feature extraction backbones and their registry
//! - The prototype classification head
//! - Scoring metrics and softmax helpers

mod backbone;
mod head;
mod metric;

pub use backbone::{
    build_backbone, Activation, Backbone, Conv4Encoder, ConvConfig, FlattenEncoder, MlpConfig,
    MlpEncoder,
};
pub use head::{HeadConfig, PrototypeHead};
pub use metric::{normalize_rows, softmax, softmax_rows, Metric};
