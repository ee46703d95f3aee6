use crate::core::cache::ModelCache;
use crate::core::expression::ExpressionNode;
use crate::core::tensor::{Tensor, TensorType};
use crate::error::{Error, Result};
use crate::infra::storage::{check_name, join, FileStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// A named group of outputs, each naming one of the model's expressions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Outputs that could not be imported, with the reason for each.
    #[serde(default)]
    pub skipped_outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub import_warnings: Vec<String>,
}

impl Signature {
    pub fn output(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), expression.into());
        self
    }

    pub fn skipped_output(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.skipped_outputs.insert(name.into(), reason.into());
        self
    }

    pub fn import_warning(mut self, warning: impl Into<String>) -> Self {
        self.import_warnings.push(warning.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportedModel {
    #[serde(default)]
    pub name: String,
    /// Constants small enough to keep inline in configuration.
    #[serde(default)]
    pub small_constants: BTreeMap<String, Tensor>,
    /// Constants distributed as files.
    #[serde(default)]
    pub large_constants: BTreeMap<String, Tensor>,
    /// Generated named sub-expressions, which may refer to each other.
    #[serde(default)]
    pub functions: BTreeMap<String, ExpressionNode>,
    #[serde(default)]
    pub required_inputs: BTreeMap<String, TensorType>,
    /// Output expressions by internal name.
    #[serde(default)]
    pub expressions: BTreeMap<String, ExpressionNode>,
    #[serde(default)]
    pub signatures: BTreeMap<String, Signature>,
}

impl ImportedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name)
    }

    pub fn expression(&self, name: &str) -> Option<&ExpressionNode> {
        self.expressions.get(name)
    }

    pub fn required_input_type(&self, name: &str) -> Option<&TensorType> {
        self.required_inputs.get(name)
    }

    /// Checks the names that end up in stored artifacts.
    pub fn validate(&self) -> Result<()> {
        for name in self.small_constants.keys() {
            check_name("small constant", name)?;
        }
        for name in self.large_constants.keys() {
            check_name("large constant", name)?;
        }
        for name in self.functions.keys() {
            check_name("function", name)?;
        }
        Ok(())
    }
}

pub trait ModelImporter: Send + Sync {
    fn import_model(&self, model_name: &str, model_directory: &str) -> Result<ImportedModel>;
}

/// Imports models described as JSON: `model.json` in the model directory,
/// or the model path itself when it names a `.json` file.
pub struct JsonModelImporter<'a> {
    store: &'a dyn FileStore,
}

impl<'a> JsonModelImporter<'a> {
    pub fn new(store: &'a dyn FileStore) -> Self {
        Self { store }
    }
}

impl ModelImporter for JsonModelImporter<'_> {
    fn import_model(&self, model_name: &str, model_directory: &str) -> Result<ImportedModel> {
        let path = if model_directory.ends_with(".json") {
            model_directory.to_string()
        } else {
            join(model_directory, "model.json")
        };
        if !self.store.exists(&path) {
            return Err(Error::NotFound(format!(
                "No model description for '{}' at '{}'",
                model_name, path
            )));
        }
        info!(model = %model_name, path = %path, "importing model");
        let text = self.store.read_to_string(&path)?;
        let mut model: ImportedModel = serde_json::from_str(&text)?;
        model.name = model_name.to_string();
        model.validate()?;
        Ok(model)
    }
}

/// Imported models by model path, shared across conversions.
pub type ImportedModelCache = ModelCache<ImportedModel>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::MemoryFileStore;

    const MODEL: &str = r#"{
        "large_constants": {"W": "tensor(d1[2],d2[2]):[[1,2],[3,4]]"},
        "small_constants": {"b": "tensor(d2[2]):[0.5,0.5]"},
        "functions": {"hidden": "input * constant(W)"},
        "required_inputs": {"input": "tensor(d0[1],d1[2])"},
        "expressions": {"out": "reduce(hidden, sum, d1) + constant(b)"},
        "signatures": {
            "serving_default": {
                "outputs": {"y": "out"},
                "skipped_outputs": {"z": "unsupported operation"},
                "import_warnings": ["op Foo ignored"]
            }
        }
    }"#;

    #[test]
    fn test_json_import() {
        let files = MemoryFileStore::new();
        files.write("models/mnist/model.json", MODEL.as_bytes()).unwrap();
        let model = JsonModelImporter::new(&files)
            .import_model("mnist", "models/mnist")
            .unwrap();
        assert_eq!(model.name, "mnist");
        assert_eq!(model.large_constants["W"].ty().to_string(), "tensor(d1[2],d2[2])");
        assert_eq!(model.required_input_type("input").unwrap().to_string(), "tensor(d0[1],d1[2])");
        let signature = model.signature("serving_default").unwrap();
        assert_eq!(signature.outputs["y"], "out");
        assert_eq!(signature.skipped_outputs["z"], "unsupported operation");
        assert_eq!(model.expression("out").unwrap().to_string(), "reduce(hidden, sum, d1) + constant(b)");
    }

    #[test]
    fn test_json_file_path_and_missing_model() {
        let files = MemoryFileStore::new();
        files.write("models/m.json", MODEL.as_bytes()).unwrap();
        let importer = JsonModelImporter::new(&files);
        assert!(importer.import_model("m_json", "models/m.json").is_ok());
        assert!(matches!(
            importer.import_model("other", "models/other"),
            Err(Error::NotFound(_))
        ));
        files.write("models/bad/model.json", b"{\"expressions\": {\"out\": \"1 +\"}}").unwrap();
        assert!(importer.import_model("bad", "models/bad").is_err());
    }

    #[test]
    fn test_constant_names_must_be_identifiers() {
        let files = MemoryFileStore::new();
        let text = r#"{"large_constants": {"dense/kernel": "tensor(x[1]):[1]"}}"#;
        files.write("models/nested/model.json", text.as_bytes()).unwrap();
        let err = JsonModelImporter::new(&files)
            .import_model("nested", "models/nested")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("'dense/kernel'"));
    }
}
