pub mod converter;
pub mod importer;
pub mod storage;

pub use converter::ModelConverter;
pub use importer::{ImportedModel, ImportedModelCache, JsonModelImporter, ModelImporter, Signature};
pub use storage::{DiskFileStore, FeatureArguments, FileStore, MemoryFileStore, ModelStore};
