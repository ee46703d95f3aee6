pub mod binary;
pub mod literal;
pub mod ops;
pub mod types;

pub use ops::{Aggregator, TensorOps};
pub use types::{Dimension, TensorType, TensorTypeBuilder};

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One coordinate of a cell address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Label {
    Index(u64),
    Key(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Index(i) => write!(f, "{}", i),
            Label::Key(key) if literal::is_plain_key(key) => write!(f, "{}", key),
            Label::Key(key) => write!(f, "\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// Labels in the dimension order of the owning tensor's type.
pub type TensorAddress = Vec<Label>;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    ty: TensorType,
    cells: BTreeMap<TensorAddress, f64>,
}

impl Tensor {
    pub fn scalar(value: f64) -> Self {
        let mut cells = BTreeMap::new();
        cells.insert(Vec::new(), value);
        Self {
            ty: TensorType::scalar(),
            cells,
        }
    }

    pub fn empty(ty: TensorType) -> Self {
        Self {
            ty,
            cells: BTreeMap::new(),
        }
    }

    pub fn from_cells<I>(ty: TensorType, cells: I) -> Result<Self>
    where
        I: IntoIterator<Item = (TensorAddress, f64)>,
    {
        let mut tensor = Self::empty(ty);
        for (address, value) in cells {
            tensor.check_address(&address)?;
            tensor.cells.insert(address, value);
        }
        Ok(tensor)
    }

    /// Builds a tensor over bound indexed dimensions from values in row-major order.
    pub fn dense(ty: TensorType, values: &[f64]) -> Result<Self> {
        let sizes = bound_sizes(&ty)?;
        let count: u64 = sizes.iter().product();
        if count != values.len() as u64 {
            return Err(Error::evaluation(format!(
                "{} needs {} values, got {}",
                ty,
                count,
                values.len()
            )));
        }
        let mut values = values.iter();
        Self::generate_with(ty, |_| Ok(values.next().copied().unwrap_or_default()))
    }

    pub(crate) fn generate_with<F>(ty: TensorType, mut f: F) -> Result<Self>
    where
        F: FnMut(&[u64]) -> Result<f64>,
    {
        let sizes = bound_sizes(&ty)?;
        let mut tensor = Self::empty(ty);
        if sizes.contains(&0) {
            return Ok(tensor);
        }
        let mut indices = vec![0u64; sizes.len()];
        loop {
            let value = f(&indices)?;
            tensor
                .cells
                .insert(indices.iter().map(|&i| Label::Index(i)).collect(), value);

            let mut position = sizes.len();
            loop {
                if position == 0 {
                    return Ok(tensor);
                }
                position -= 1;
                indices[position] += 1;
                if indices[position] < sizes[position] {
                    break;
                }
                indices[position] = 0;
            }
        }
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn cells(&self) -> &BTreeMap<TensorAddress, f64> {
        &self.cells
    }

    pub fn get(&self, address: &[Label]) -> Option<f64> {
        self.cells.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The single value of a scalar or single-cell tensor.
    pub fn as_double(&self) -> Result<f64> {
        match self.cells.len() {
            0 if self.ty.is_scalar() => Ok(0.0),
            1 => Ok(self.cells.values().copied().next().unwrap_or_default()),
            n => Err(Error::evaluation(format!(
                "Expected a single value but {} has {} cells",
                self.ty, n
            ))),
        }
    }

    /// Cell-wise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &Tensor, tolerance: f64) -> bool {
        self.ty == other.ty
            && self.cells.len() == other.cells.len()
            && self
                .cells
                .iter()
                .zip(&other.cells)
                .all(|((a, x), (b, y))| a == b && (x - y).abs() <= tolerance)
    }

    pub fn from_literal(ty: Option<&TensorType>, text: &str) -> Result<Self> {
        literal::parse(ty, text)
    }

    fn check_address(&self, address: &[Label]) -> Result<()> {
        if address.len() != self.ty.rank() {
            return Err(Error::evaluation(format!(
                "Address of {} labels does not fit {}",
                address.len(),
                self.ty
            )));
        }
        for (label, dimension) in address.iter().zip(self.ty.dimensions()) {
            let fits = match (label, dimension) {
                (Label::Index(i), Dimension::Indexed { size, .. }) => size.map_or(true, |s| *i < s),
                (Label::Key(_), Dimension::Mapped { .. }) => true,
                _ => false,
            };
            if !fits {
                return Err(Error::evaluation(format!(
                    "Label '{}' is not valid for dimension {} of {}",
                    label, dimension, self.ty
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn bound_sizes(ty: &TensorType) -> Result<Vec<u64>> {
    ty.dimensions()
        .iter()
        .map(|d| match d {
            Dimension::Indexed { size: Some(size), .. } => Ok(*size),
            _ => Err(Error::evaluation(format!(
                "Dimension {} of {} must be indexed and bound",
                d, ty
            ))),
        })
        .collect()
}

pub(crate) fn format_number(value: f64) -> String {
    format!("{:?}", value)
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Tensor::scalar(value)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{{", self.ty)?;
        let names = self.ty.dimension_names();
        for (i, (address, value)) in self.cells.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{{")?;
            for (j, (name, label)) in names.iter().zip(address).enumerate() {
                if j > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}:{}", name, label)?;
            }
            write!(f, "}}:{}", format_number(*value))?;
        }
        write!(f, "}}")
    }
}

impl FromStr for Tensor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        literal::parse(None, s)
    }
}

impl serde::Serialize for Tensor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Tensor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let ty = TensorType::from_spec("tensor(x[2],y[3])").unwrap();
        let t = Tensor::dense(ty, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.len(), 6);
        assert_eq!(t.get(&[Label::Index(1), Label::Index(0)]), Some(4.0));
        assert_eq!(t.get(&[Label::Index(0), Label::Index(2)]), Some(3.0));
    }

    #[test]
    fn test_dense_size_mismatch() {
        let ty = TensorType::from_spec("tensor(x[2])").unwrap();
        assert!(Tensor::dense(ty, &[1.0]).is_err());
        let mapped = TensorType::from_spec("tensor(x{})").unwrap();
        assert!(Tensor::dense(mapped, &[]).is_err());
    }

    #[test]
    fn test_address_validation() {
        let ty = TensorType::from_spec("tensor(k{},x[2])").unwrap();
        let ok = vec![Label::Key("a".into()), Label::Index(1)];
        assert!(Tensor::from_cells(ty.clone(), vec![(ok, 1.0)]).is_ok());
        let out_of_range = vec![Label::Key("a".into()), Label::Index(2)];
        assert!(Tensor::from_cells(ty.clone(), vec![(out_of_range, 1.0)]).is_err());
        let wrong_kind = vec![Label::Index(0), Label::Index(0)];
        assert!(Tensor::from_cells(ty, vec![(wrong_kind, 1.0)]).is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let text = "tensor(k{},x[2]):{{k:a,x:0}:1.0,{k:\"b c\",x:1}:-2.5}";
        let t: Tensor = text.parse().unwrap();
        assert_eq!(t.to_string(), text);
        assert_eq!(Tensor::scalar(3.0).to_string(), "tensor():{{}:3.0}");
    }

    #[test]
    fn test_as_double() {
        assert_eq!(Tensor::scalar(2.5).as_double().unwrap(), 2.5);
        let ty = TensorType::from_spec("tensor(x[2])").unwrap();
        assert!(Tensor::dense(ty, &[1.0, 2.0]).unwrap().as_double().is_err());
    }
}
