pub mod cache;
pub mod expression;
pub mod model;
pub mod profile;
pub mod tensor;

pub use cache::ModelCache;
pub use expression::{ExpressionNode, Reference};
pub use model::{ExpressionFunction, FunctionEvaluator, Model, ModelRegistry};
pub use profile::{RankProfile, RankingConstant};
pub use tensor::{Aggregator, Dimension, Tensor, TensorOps, TensorType};
