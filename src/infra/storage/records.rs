use crate::core::expression::ExpressionNode;
use crate::core::profile::RankingConstant;
use crate::core::tensor::{Tensor, TensorType};
use crate::error::{Error, Result};

/// One line of a persisted artifact: `name\ttype\tvalue` for small
/// constants, `name:type:path` for large constant metadata and
/// `name\texpression` for macros.
pub trait Record: Sized {
    fn name(&self) -> &str;

    fn encode(&self) -> String;

    fn decode(line: &str) -> Result<Self>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmallConstantRecord {
    pub name: String,
    pub value: Tensor,
}

impl Record for SmallConstantRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self) -> String {
        format!("{}\t{}\t{}", self.name, self.value.ty(), self.value)
    }

    fn decode(line: &str) -> Result<Self> {
        let mut fields = line.splitn(3, '\t');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(name), Some(ty), Some(value)) if !name.is_empty() => {
                let ty = TensorType::from_spec(ty)?;
                Ok(Self {
                    name: name.to_string(),
                    value: Tensor::from_literal(Some(&ty), value)?,
                })
            }
            _ => Err(Error::parse(line, "expected 'name<tab>type<tab>value'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LargeConstantRecord {
    pub name: String,
    pub ty: TensorType,
    /// Content file path relative to the application root.
    pub path: String,
}

impl LargeConstantRecord {
    pub fn to_ranking_constant(&self) -> RankingConstant {
        RankingConstant {
            name: self.name.clone(),
            ty: self.ty.clone(),
            path: self.path.clone(),
        }
    }
}

impl Record for LargeConstantRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self) -> String {
        format!("{}:{}:{}", self.name, self.ty, self.path)
    }

    fn decode(line: &str) -> Result<Self> {
        let mut fields = line.splitn(3, ':');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(name), Some(ty), Some(path)) if !name.is_empty() && !path.is_empty() => Ok(Self {
                name: name.to_string(),
                ty: TensorType::from_spec(ty)?,
                path: path.to_string(),
            }),
            _ => Err(Error::parse(line, "expected 'name:type:path'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroRecord {
    pub name: String,
    pub expression: ExpressionNode,
}

impl Record for MacroRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self) -> String {
        format!("{}\t{}", self.name, self.expression)
    }

    fn decode(line: &str) -> Result<Self> {
        match line.split_once('\t') {
            Some((name, expression)) if !name.is_empty() => Ok(Self {
                name: name.to_string(),
                expression: ExpressionNode::parse(expression)?,
            }),
            _ => Err(Error::parse(line, "expected 'name<tab>expression'")),
        }
    }
}

/// Record names become file names and line fields, so they must be
/// identifiers: a letter or '_' followed by letters, digits or '_'.
pub fn check_name(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "Invalid {} name '{}': expected a letter or '_' followed by letters, digits or '_'",
            kind, name
        )))
    }
}

/// Decodes one record per non-empty line.
pub fn decode_lines<R: Record>(text: &str) -> Result<Vec<R>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(R::decode)
        .collect()
}

/// Newline-terminated lines for the records whose names are not in `existing`.
pub fn encode_new_lines<R: Record>(records: &[R], existing: &[R]) -> String {
    let mut seen: Vec<&str> = existing.iter().map(Record::name).collect();
    let mut text = String::new();
    for record in records {
        if seen.contains(&record.name()) {
            continue;
        }
        seen.push(record.name());
        text.push_str(&record.encode());
        text.push('\n');
    }
    text
}
