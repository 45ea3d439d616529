//! Few-shot model wrappers and their lifecycle interface

mod fewshot;
mod protonet;

pub use fewshot::{FewShotHyperparams, FewShotModule, OptimType, OptimizerSettings};
pub use protonet::{split_support_query, ProtoNet};
