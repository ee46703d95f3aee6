pub mod core;
pub mod error;
pub mod infra;

pub use crate::core::{
    Aggregator, Dimension, ExpressionFunction, ExpressionNode, FunctionEvaluator, Model, ModelCache, ModelRegistry,
    RankProfile, RankingConstant, Reference, Tensor, TensorOps, TensorType,
};
pub use crate::error::{Error, Result};
pub use crate::infra::{
    DiskFileStore, FeatureArguments, FileStore, ImportedModel, ImportedModelCache, JsonModelImporter, MemoryFileStore,
    ModelConverter, ModelImporter, ModelStore, Signature,
};
