use super::join;
use crate::error::{Error, Result};
use std::fmt;

pub const GENERATED_DIR: &str = "models.generated";
pub const REPLICATED_DIR: &str = "models.generated.replicated";
pub const MODELS_DIR: &str = "models";

/// Identifies one conversion: a model path plus an optional signature and
/// output. All artifact paths are derived from these three fields only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureArguments {
    model_path: String,
    signature: Option<String>,
    output: Option<String>,
}

impl FeatureArguments {
    pub fn new(
        model_path: impl Into<String>,
        signature: Option<String>,
        output: Option<String>,
    ) -> Result<Self> {
        let model_path = model_path.into().trim_matches('/').to_string();
        if model_path.is_empty() || model_path.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(Error::config(format!("Invalid model path '{}'", model_path)));
        }
        for (kind, name) in [("signature", &signature), ("output", &output)] {
            if matches!(name.as_deref(), Some("")) {
                return Err(Error::config(format!("An empty {} name was given for model '{}'", kind, model_path)));
            }
        }
        Ok(Self {
            model_path,
            signature,
            output,
        })
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// The model path with '/' and '.' replaced by '_'.
    pub fn model_name(&self) -> String {
        self.model_path.replace(['/', '.'], "_")
    }

    /// Where the importer reads the model from.
    pub fn model_directory(&self) -> String {
        join(MODELS_DIR, &self.model_path)
    }

    pub fn generated_path(&self) -> String {
        join(GENERATED_DIR, &self.model_path)
    }

    pub fn replicated_path(&self) -> String {
        join(REPLICATED_DIR, &self.model_path)
    }

    pub fn small_constants_path(&self) -> String {
        join(&self.generated_path(), "constants.txt")
    }

    pub fn large_constants_metadata_directory(&self) -> String {
        join(&self.replicated_path(), "constants")
    }

    pub fn large_constant_metadata_path(&self, name: &str) -> String {
        join(&self.large_constants_metadata_directory(), &format!("{}.constant", name))
    }

    pub fn large_constant_content_path(&self, name: &str) -> String {
        join(&join(&self.generated_path(), "constants"), &format!("{}.tbf", name))
    }

    pub fn macros_path(&self) -> String {
        join(&self.replicated_path(), "macros.txt")
    }

    pub fn expressions_directory(&self) -> String {
        join(&self.replicated_path(), "expressions")
    }

    pub fn expression_path(&self) -> String {
        join(&self.expressions_directory(), &self.expression_file_name())
    }

    /// `{signature}.{output}.expression`, with either part left empty when
    /// absent, or `single.expression` when both are.
    pub fn expression_file_name(&self) -> String {
        match (&self.signature, &self.output) {
            (None, None) => "single.expression".to_string(),
            (signature, output) => format!(
                "{}.{}.expression",
                signature.as_deref().map(escape).unwrap_or_default(),
                output.as_deref().map(escape).unwrap_or_default()
            ),
        }
    }
}

/// Percent-encodes the characters that would make file names ambiguous.
fn escape(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '.' => escaped.push_str("%2E"),
            '/' => escaped.push_str("%2F"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl fmt::Display for FeatureArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model_path)?;
        if let Some(signature) = &self.signature {
            write!(f, " signature '{}'", signature)?;
        }
        if let Some(output) = &self.output {
            write!(f, " output '{}'", output)?;
        }
        Ok(())
    }
}
