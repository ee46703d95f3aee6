use super::records::{check_name, decode_lines, encode_new_lines, LargeConstantRecord, MacroRecord, Record, SmallConstantRecord};
use super::{FeatureArguments, FileStore};
use crate::core::expression::ExpressionNode;
use crate::core::profile::RankProfile;
use crate::core::tensor::{binary, Tensor};
use crate::error::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// Reads and writes the artifacts of one conversion.
pub struct ModelStore<'a> {
    store: &'a dyn FileStore,
    arguments: FeatureArguments,
}

/// Writes collected while a conversion runs, applied together once it has
/// succeeded.
#[derive(Debug, Default)]
pub struct PendingWrites {
    pub small_constants: Vec<SmallConstantRecord>,
    pub large_constants: Vec<(LargeConstantRecord, Tensor)>,
    pub macros: Vec<MacroRecord>,
    pub expression: Option<ExpressionNode>,
}

impl<'a> ModelStore<'a> {
    pub fn new(store: &'a dyn FileStore, arguments: FeatureArguments) -> Self {
        Self { store, arguments }
    }

    pub fn arguments(&self) -> &FeatureArguments {
        &self.arguments
    }

    /// Whether this conversion has been stored before.
    pub fn has_stored_model(&self) -> bool {
        self.store.exists(&self.arguments.expression_path())
    }

    pub fn read_expression(&self) -> Result<ExpressionNode> {
        let path = self.arguments.expression_path();
        let text = self.store.read_to_string(&path)?;
        ExpressionNode::parse(text.trim())
            .map_err(|e| Error::config(format!("Stored expression '{}' is invalid: {}", path, e)))
    }

    pub fn read_small_constants(&self) -> Result<Vec<SmallConstantRecord>> {
        self.read_records(&self.arguments.small_constants_path())
    }

    pub fn read_macros(&self) -> Result<Vec<MacroRecord>> {
        self.read_records(&self.arguments.macros_path())
    }

    /// Large constant metadata; the content files are not read.
    pub fn read_large_constants(&self) -> Result<Vec<LargeConstantRecord>> {
        let mut records = Vec::new();
        for path in self
            .store
            .list_children(&self.arguments.large_constants_metadata_directory())?
        {
            if !path.ends_with(".constant") {
                continue;
            }
            let text = self.store.read_to_string(&path)?;
            let record = LargeConstantRecord::decode(text.trim())
                .map_err(|e| Error::config(format!("Stored constant '{}' is invalid: {}", path, e)))?;
            records.push(record);
        }
        Ok(records)
    }

    /// A record for a large constant whose content goes to its
    /// content-addressed path.
    pub fn large_constant_record(&self, name: &str, value: &Tensor) -> LargeConstantRecord {
        LargeConstantRecord {
            name: name.to_string(),
            ty: value.ty().clone(),
            path: self.arguments.large_constant_content_path(name),
        }
    }

    /// Applies the writes of a finished conversion. The expression, which
    /// marks the conversion as stored, is written last.
    pub fn commit(&self, pending: PendingWrites) -> Result<()> {
        for record in &pending.small_constants {
            check_name("small constant", &record.name)?;
        }
        for (record, _) in &pending.large_constants {
            check_name("large constant", &record.name)?;
        }
        for record in &pending.macros {
            check_name("function", &record.name)?;
        }

        let existing = self.read_small_constants()?;
        let lines = encode_new_lines(&pending.small_constants, &existing);
        if !lines.is_empty() {
            self.store.append(&self.arguments.small_constants_path(), &lines)?;
        }

        for (record, value) in &pending.large_constants {
            let metadata_path = self.arguments.large_constant_metadata_path(&record.name);
            debug!(constant = %record.name, path = %record.path, "writing large constant");
            self.store.write(&record.path, &binary::encode(value)?)?;
            self.store.write(&metadata_path, record.encode().as_bytes())?;
        }

        let existing = self.read_macros()?;
        let lines = encode_new_lines(&pending.macros, &existing);
        if !lines.is_empty() {
            self.store.append(&self.arguments.macros_path(), &lines)?;
        }

        if let Some(expression) = &pending.expression {
            self.store
                .write(&self.arguments.expression_path(), expression.to_string().as_bytes())?;
        }
        Ok(())
    }

    fn read_records<R: Record>(&self, path: &str) -> Result<Vec<R>> {
        if !self.store.exists(path) {
            return Ok(Vec::new());
        }
        let text = self.store.read_to_string(path)?;
        decode_lines(&text).map_err(|e| Error::config(format!("Stored records in '{}' are invalid: {}", path, e)))
    }
}

/// Values of the profile's file constants, read from their content files.
pub fn load_ranking_constant_values(store: &dyn FileStore, profile: &RankProfile) -> Result<HashMap<String, Tensor>> {
    let mut values = HashMap::new();
    for constant in profile.ranking_constants() {
        let data = store.read(&constant.path)?;
        let value = binary::decode(&data)
            .map_err(|e| Error::config(format!("Constant file '{}' is invalid: {}", constant.path, e)))?;
        values.insert(constant.name.clone(), value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::MemoryFileStore;

    fn arguments() -> FeatureArguments {
        FeatureArguments::new("m", None, None).unwrap()
    }

    #[test]
    fn test_commit_writes_everything() {
        let files = MemoryFileStore::new();
        let store = ModelStore::new(&files, arguments());
        assert!(!store.has_stored_model());

        let w: Tensor = "tensor(x[2]):[1,2]".parse().unwrap();
        let record = store.large_constant_record("W", &w);
        store
            .commit(PendingWrites {
                small_constants: vec![SmallConstantRecord {
                    name: "c".into(),
                    value: Tensor::scalar(2.0),
                }],
                large_constants: vec![(record.clone(), w.clone())],
                macros: vec![MacroRecord {
                    name: "f".into(),
                    expression: ExpressionNode::parse("constant(W) * c").unwrap(),
                }],
                expression: Some(ExpressionNode::parse("reduce(f, sum)").unwrap()),
            })
            .unwrap();

        assert!(store.has_stored_model());
        assert_eq!(store.read_expression().unwrap().to_string(), "reduce(f, sum)");
        assert_eq!(store.read_small_constants().unwrap()[0].value, Tensor::scalar(2.0));
        assert_eq!(store.read_large_constants().unwrap(), vec![record]);
        assert_eq!(store.read_macros().unwrap()[0].name, "f");
        assert_eq!(binary::decode(&files.read("models.generated/m/constants/W.tbf").unwrap()).unwrap(), w);
    }

    #[test]
    fn test_commit_appends_only_new_names() {
        let files = MemoryFileStore::new();
        let store = ModelStore::new(&files, arguments());
        let pending = || PendingWrites {
            macros: vec![MacroRecord {
                name: "f".into(),
                expression: ExpressionNode::parse("1").unwrap(),
            }],
            ..PendingWrites::default()
        };
        store.commit(pending()).unwrap();
        store.commit(pending()).unwrap();
        assert_eq!(store.read_macros().unwrap().len(), 1);
        assert!(!store.has_stored_model());
    }

    #[test]
    fn test_commit_rejects_names_that_are_not_identifiers() {
        let files = MemoryFileStore::new();
        let store = ModelStore::new(&files, arguments());
        let w = Tensor::scalar(1.0);
        let pending = PendingWrites {
            large_constants: vec![(store.large_constant_record("dense/kernel", &w), w.clone())],
            expression: Some(ExpressionNode::parse("1").unwrap()),
            ..PendingWrites::default()
        };
        assert!(matches!(store.commit(pending), Err(Error::Config(_))));
        assert!(files.paths().is_empty());
    }

    #[test]
    fn test_invalid_stored_macro_is_a_config_error() {
        let files = MemoryFileStore::new();
        files.write("models.generated.replicated/m/macros.txt", b"f\t1 +\n").unwrap();
        let store = ModelStore::new(&files, arguments());
        assert!(matches!(store.read_macros(), Err(Error::Config(_))));
    }
}
