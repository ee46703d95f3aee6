use super::{bound_sizes, Label, Tensor, TensorAddress, TensorType};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregator {
    Avg,
    Count,
    Max,
    Min,
    Prod,
    Sum,
}

impl Aggregator {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregator::Avg => "avg",
            Aggregator::Count => "count",
            Aggregator::Max => "max",
            Aggregator::Min => "min",
            Aggregator::Prod => "prod",
            Aggregator::Sum => "sum",
        }
    }

    fn aggregate(&self, values: &[f64]) -> f64 {
        match self {
            Aggregator::Avg if values.is_empty() => 0.0,
            Aggregator::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregator::Count => values.len() as f64,
            Aggregator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregator::Prod => values.iter().product(),
            Aggregator::Sum => values.iter().sum(),
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Aggregator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "avg" => Aggregator::Avg,
            "count" => Aggregator::Count,
            "max" => Aggregator::Max,
            "min" => Aggregator::Min,
            "prod" => Aggregator::Prod,
            "sum" => Aggregator::Sum,
            _ => return Err(Error::parse(s, "unknown aggregator")),
        })
    }
}

pub trait TensorOps {
    /// Combines every pair of cells agreeing on the shared dimensions.
    fn join<F>(&self, other: &Tensor, f: F) -> Result<Tensor>
    where
        F: FnMut(f64, f64) -> Result<f64>;

    /// Aggregates away the given dimensions; an empty list aggregates all.
    fn reduce(&self, aggregator: Aggregator, dimensions: &[String]) -> Result<Tensor>;

    fn map<F>(&self, f: F) -> Result<Tensor>
    where
        F: FnMut(f64) -> Result<f64>;

    fn rename(&self, from: &[String], to: &[String]) -> Result<Tensor>;
}

impl TensorOps for Tensor {
    fn join<F>(&self, other: &Tensor, mut f: F) -> Result<Tensor>
    where
        F: FnMut(f64, f64) -> Result<f64>,
    {
        let ty = self.ty.join(&other.ty).ok_or_else(|| {
            Error::evaluation(format!("Cannot join {} and {}", self.ty, other.ty))
        })?;

        let shared: Vec<(usize, usize)> = self
            .ty
            .dimensions()
            .iter()
            .enumerate()
            .filter_map(|(i, d)| other.ty.index_of(d.name()).map(|j| (i, j)))
            .collect();
        let sources: Vec<(Option<usize>, Option<usize>)> = ty
            .dimensions()
            .iter()
            .map(|d| (self.ty.index_of(d.name()), other.ty.index_of(d.name())))
            .collect();

        let mut by_shared: HashMap<Vec<&Label>, Vec<(&TensorAddress, f64)>> = HashMap::new();
        for (address, value) in &other.cells {
            let key = shared.iter().map(|&(_, j)| &address[j]).collect();
            by_shared.entry(key).or_default().push((address, *value));
        }

        let mut cells = BTreeMap::new();
        for (a, x) in &self.cells {
            let key: Vec<&Label> = shared.iter().map(|&(i, _)| &a[i]).collect();
            let Some(matches) = by_shared.get(&key) else {
                continue;
            };
            for (b, y) in matches {
                let address: Option<TensorAddress> = sources
                    .iter()
                    .map(|source| match source {
                        (Some(i), _) => Some(a[*i].clone()),
                        (None, Some(j)) => Some(b[*j].clone()),
                        (None, None) => None,
                    })
                    .collect();
                match address {
                    Some(address) if fits(&ty, &address) => {
                        cells.insert(address, f(*x, *y)?);
                    }
                    _ => {}
                }
            }
        }
        Ok(Tensor { ty, cells })
    }

    fn reduce(&self, aggregator: Aggregator, dimensions: &[String]) -> Result<Tensor> {
        let ty = self.ty.reduce(dimensions).ok_or_else(|| {
            Error::evaluation(format!(
                "Cannot reduce {} over [{}]",
                self.ty,
                dimensions.join(", ")
            ))
        })?;
        let kept: Vec<usize> = ty
            .dimensions()
            .iter()
            .filter_map(|d| self.ty.index_of(d.name()))
            .collect();

        let mut groups: BTreeMap<TensorAddress, Vec<f64>> = BTreeMap::new();
        for (address, value) in &self.cells {
            let key = kept.iter().map(|&i| address[i].clone()).collect();
            groups.entry(key).or_default().push(*value);
        }
        if groups.is_empty() && ty.is_scalar() {
            groups.insert(Vec::new(), Vec::new());
        }
        let cells = groups
            .into_iter()
            .map(|(address, values)| (address, aggregator.aggregate(&values)))
            .collect();
        Ok(Tensor { ty, cells })
    }

    fn map<F>(&self, mut f: F) -> Result<Tensor>
    where
        F: FnMut(f64) -> Result<f64>,
    {
        let mut cells = BTreeMap::new();
        for (address, value) in &self.cells {
            cells.insert(address.clone(), f(*value)?);
        }
        Ok(Tensor {
            ty: self.ty.clone(),
            cells,
        })
    }

    fn rename(&self, from: &[String], to: &[String]) -> Result<Tensor> {
        let ty = self.ty.rename(from, to).ok_or_else(|| {
            Error::evaluation(format!(
                "Cannot rename ({}) to ({}) in {}",
                from.join(","),
                to.join(","),
                self.ty
            ))
        })?;
        let sources: Vec<usize> = ty
            .dimensions()
            .iter()
            .map(|d| {
                let original = match to.iter().position(|n| n == d.name()) {
                    Some(i) => from[i].as_str(),
                    None => d.name(),
                };
                self.ty.index_of(original).unwrap_or_default()
            })
            .collect();
        let cells = self
            .cells
            .iter()
            .map(|(address, value)| (sources.iter().map(|&i| address[i].clone()).collect(), *value))
            .collect();
        Ok(Tensor { ty, cells })
    }
}

impl Tensor {
    /// Creates a tensor over bound indexed dimensions by computing each cell
    /// from its indices, given in the type's dimension order.
    pub fn generate<F>(ty: TensorType, f: F) -> Result<Tensor>
    where
        F: FnMut(&[u64]) -> Result<f64>,
    {
        bound_sizes(&ty)?;
        Tensor::generate_with(ty, f)
    }
}

fn fits(ty: &TensorType, address: &[Label]) -> bool {
    address.iter().zip(ty.dimensions()).all(|(label, d)| match (label, d.size()) {
        (Label::Index(i), Some(size)) => *i < size,
        _ => true,
    })
}
