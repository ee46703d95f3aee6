use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Indexed { name: String, size: Option<u64> },
    Mapped { name: String },
}

impl Dimension {
    pub fn indexed(name: impl Into<String>, size: u64) -> Self {
        Dimension::Indexed {
            name: name.into(),
            size: Some(size),
        }
    }

    pub fn indexed_unbound(name: impl Into<String>) -> Self {
        Dimension::Indexed {
            name: name.into(),
            size: None,
        }
    }

    pub fn mapped(name: impl Into<String>) -> Self {
        Dimension::Mapped { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Dimension::Indexed { name, .. } | Dimension::Mapped { name } => name,
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            Dimension::Indexed { size, .. } => *size,
            Dimension::Mapped { .. } => None,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, Dimension::Indexed { .. })
    }

    fn renamed(&self, name: &str) -> Self {
        match self {
            Dimension::Indexed { size, .. } => Dimension::Indexed {
                name: name.to_string(),
                size: *size,
            },
            Dimension::Mapped { .. } => Dimension::mapped(name),
        }
    }

    /// A bounded indexed dimension is assignable to an unbound or larger one.
    fn is_assignable_to(&self, generalization: &Dimension) -> bool {
        if self.name() != generalization.name() || self.is_indexed() != generalization.is_indexed() {
            return false;
        }
        match (self.size(), generalization.size()) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(size), Some(limit)) => size <= limit,
        }
    }

    fn join(&self, other: &Dimension) -> Option<Dimension> {
        match (self, other) {
            (Dimension::Mapped { .. }, Dimension::Mapped { .. }) => Some(self.clone()),
            (Dimension::Indexed { name, size: a }, Dimension::Indexed { size: b, .. }) => {
                let size = match (a, b) {
                    (Some(a), Some(b)) => Some(*a.min(b)),
                    (Some(s), None) | (None, Some(s)) => Some(*s),
                    (None, None) => None,
                };
                Some(Dimension::Indexed {
                    name: name.clone(),
                    size,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Indexed { name, size: Some(size) } => write!(f, "{}[{}]", name, size),
            Dimension::Indexed { name, size: None } => write!(f, "{}[]", name),
            Dimension::Mapped { name } => write!(f, "{}{{}}", name),
        }
    }
}

/// The type of a tensor: a set of uniquely named dimensions kept in name order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorType {
    dimensions: Vec<Dimension>,
}

impl TensorType {
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn builder() -> TensorTypeBuilder {
        TensorTypeBuilder::default()
    }

    pub fn from_spec(spec: &str) -> Result<Self> {
        SpecParser::new(spec).parse()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name() == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name() == name)
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name()).collect()
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Whether a value of this type can be used where `generalization` is required.
    pub fn is_assignable_to(&self, generalization: &TensorType) -> bool {
        self.dimensions.len() == generalization.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(&generalization.dimensions)
                .all(|(d, g)| d.is_assignable_to(g))
    }

    /// The type of joining a tensor of this type with one of `other`, or `None`
    /// if a shared dimension is indexed in one and mapped in the other.
    pub fn join(&self, other: &TensorType) -> Option<TensorType> {
        let mut dimensions = Vec::with_capacity(self.rank() + other.rank());
        for dimension in &self.dimensions {
            match other.dimension(dimension.name()) {
                Some(shared) => dimensions.push(dimension.join(shared)?),
                None => dimensions.push(dimension.clone()),
            }
        }
        for dimension in &other.dimensions {
            if self.dimension(dimension.name()).is_none() {
                dimensions.push(dimension.clone());
            }
        }
        Some(Self::sorted(dimensions))
    }

    /// Removes the given dimensions; an empty list removes all of them.
    pub fn reduce(&self, names: &[String]) -> Option<TensorType> {
        if names.is_empty() {
            return Some(Self::scalar());
        }
        if names.iter().any(|n| self.dimension(n).is_none()) {
            return None;
        }
        Some(TensorType {
            dimensions: self
                .dimensions
                .iter()
                .filter(|d| !names.iter().any(|n| n == d.name()))
                .cloned()
                .collect(),
        })
    }

    pub fn rename(&self, from: &[String], to: &[String]) -> Option<TensorType> {
        if from.len() != to.len() || from.iter().any(|n| self.dimension(n).is_none()) {
            return None;
        }
        let dimensions: Vec<Dimension> = self
            .dimensions
            .iter()
            .map(|d| match from.iter().position(|n| n == d.name()) {
                Some(i) => d.renamed(&to[i]),
                None => d.clone(),
            })
            .collect();
        let renamed = Self::sorted(dimensions);
        if renamed.has_duplicates() {
            return None;
        }
        Some(renamed)
    }

    fn sorted(mut dimensions: Vec<Dimension>) -> Self {
        dimensions.sort_by(|a, b| a.name().cmp(b.name()));
        Self { dimensions }
    }

    fn has_duplicates(&self) -> bool {
        self.dimensions.windows(2).any(|w| w[0].name() == w[1].name())
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor(")?;
        for (i, dimension) in self.dimensions.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", dimension)?;
        }
        write!(f, ")")
    }
}

impl FromStr for TensorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_spec(s)
    }
}

impl serde::Serialize for TensorType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for TensorType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let spec = String::deserialize(deserializer)?;
        TensorType::from_spec(&spec).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Default)]
pub struct TensorTypeBuilder {
    dimensions: Vec<Dimension>,
}

impl TensorTypeBuilder {
    pub fn indexed(mut self, name: impl Into<String>, size: u64) -> Self {
        self.dimensions.push(Dimension::indexed(name, size));
        self
    }

    pub fn indexed_unbound(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(Dimension::indexed_unbound(name));
        self
    }

    pub fn mapped(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(Dimension::mapped(name));
        self
    }

    pub fn dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn build(self) -> Result<TensorType> {
        let built = TensorType::sorted(self.dimensions);
        if let Some(w) = built.dimensions.windows(2).find(|w| w[0].name() == w[1].name()) {
            return Err(Error::config(format!(
                "Dimension '{}' is declared more than once",
                w[0].name()
            )));
        }
        Ok(built)
    }
}

struct SpecParser<'a> {
    spec: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> SpecParser<'a> {
    fn new(spec: &'a str) -> Self {
        Self {
            spec,
            chars: spec.char_indices().peekable(),
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.spec, message)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_whitespace();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((i, c)) => Err(self.error(format!("expected '{}' at {}, got '{}'", expected, i, c))),
            None => Err(self.error(format!("expected '{}' at end", expected))),
        }
    }

    fn identifier(&mut self) -> Result<String> {
        self.skip_whitespace();
        let mut name = String::new();
        while let Some((_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || *c == '_' {
                name.push(*c);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.error("expected a name"));
        }
        Ok(name)
    }

    fn parse(mut self) -> Result<TensorType> {
        let keyword = self.identifier()?;
        if keyword == "double" || keyword == "float" {
            self.end()?;
            return Ok(TensorType::scalar());
        }
        if keyword != "tensor" {
            return Err(self.error("a tensor type spec must start with 'tensor'"));
        }
        self.skip_whitespace();
        if matches!(self.chars.peek(), Some((_, '<'))) {
            self.chars.next();
            let cell_type = self.identifier()?;
            if cell_type != "double" && cell_type != "float" {
                return Err(self.error(format!("unsupported cell type '{}'", cell_type)));
            }
            self.expect('>')?;
        }
        self.expect('(')?;
        let mut builder = TensorType::builder();
        self.skip_whitespace();
        if matches!(self.chars.peek(), Some((_, ')'))) {
            self.chars.next();
            self.end()?;
            return builder.build();
        }
        loop {
            builder = builder.dimension(self.dimension()?);
            self.skip_whitespace();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, ')')) => break,
                _ => return Err(self.error("expected ',' or ')' after dimension")),
            }
        }
        self.end()?;
        builder.build().map_err(|e| self.error(e.to_string()))
    }

    fn dimension(&mut self) -> Result<Dimension> {
        let name = self.identifier()?;
        self.skip_whitespace();
        match self.chars.next() {
            Some((_, '{')) => {
                self.expect('}')?;
                Ok(Dimension::mapped(name))
            }
            Some((_, '[')) => {
                self.skip_whitespace();
                let mut digits = String::new();
                while let Some((_, c)) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(*c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                self.expect(']')?;
                if digits.is_empty() {
                    Ok(Dimension::indexed_unbound(name))
                } else {
                    let size = digits
                        .parse()
                        .map_err(|_| self.error(format!("bad size '{}'", digits)))?;
                    Ok(Dimension::indexed(name, size))
                }
            }
            _ => Err(self.error(format!("expected '[' or '{{' after dimension '{}'", name))),
        }
    }

    fn end(&mut self) -> Result<()> {
        self.skip_whitespace();
        match self.chars.next() {
            None => Ok(()),
            Some((i, _)) => Err(self.error(format!("unexpected trailing input at {}", i))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(spec: &str) -> TensorType {
        TensorType::from_spec(spec).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let ty = t("tensor(d1[10], d0[1], key{}, free[])");
        assert_eq!(ty.to_string(), "tensor(d0[1],d1[10],free[],key{})");
        assert_eq!(ty.rank(), 4);
        assert_eq!(ty.dimension_names(), vec!["d0", "d1", "free", "key"]);
        assert_eq!(t("tensor()"), TensorType::scalar());
        assert_eq!(t("double"), TensorType::scalar());
        assert_eq!(t("tensor<float>(x[2])"), t("tensor(x[2])"));
    }

    #[test]
    fn test_malformed_specs() {
        for spec in ["tensor(x[", "tensor(x[2],x[3])", "matrix(x[2])", "tensor(x)", "tensor(x[2]) y"] {
            assert!(matches!(TensorType::from_spec(spec), Err(Error::Parse { .. })), "{}", spec);
        }
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        assert!(TensorType::builder().indexed("x", 2).mapped("x").build().is_err());
        let ty = TensorType::builder().mapped("b").indexed("a", 3).build().unwrap();
        assert_eq!(ty.to_string(), "tensor(a[3],b{})");
    }

    #[test]
    fn test_assignability() {
        for spec in ["tensor()", "tensor(x[3])", "tensor(x{},y[])", "tensor(d0[1],d1[10])"] {
            assert!(t(spec).is_assignable_to(&t(spec)), "{}", spec);
        }
        assert!(t("tensor(x[3])").is_assignable_to(&t("tensor(x[])")));
        assert!(t("tensor(x[3])").is_assignable_to(&t("tensor(x[5])")));
        assert!(!t("tensor(x[5])").is_assignable_to(&t("tensor(x[3])")));
        assert!(!t("tensor(x[])").is_assignable_to(&t("tensor(x[3])")));
        assert!(!t("tensor(x[3])").is_assignable_to(&t("tensor(x{})")));
        assert!(!t("tensor(d1[10])").is_assignable_to(&t("tensor(d0[1],d1[10])")));
        assert!(!t("tensor()").is_assignable_to(&t("tensor(x[1])")));
    }

    #[test]
    fn test_join_reduce_rename() {
        let joined = t("tensor(d0[1],d1[10])").join(&t("tensor(d1[10],d2[5])")).unwrap();
        assert_eq!(joined, t("tensor(d0[1],d1[10],d2[5])"));
        assert_eq!(t("tensor(x[3])").join(&t("tensor(x[5])")).unwrap(), t("tensor(x[3])"));
        assert!(t("tensor(x[3])").join(&t("tensor(x{})")).is_none());

        let names = vec!["d1".to_string()];
        assert_eq!(joined.reduce(&names).unwrap(), t("tensor(d0[1],d2[5])"));
        assert_eq!(joined.reduce(&[]).unwrap(), TensorType::scalar());
        assert!(joined.reduce(&["nope".to_string()]).is_none());

        let renamed = t("tensor(a[2],b{})").rename(&["a".to_string()], &["c".to_string()]).unwrap();
        assert_eq!(renamed, t("tensor(b{},c[2])"));
        assert!(t("tensor(a[2],b{})").rename(&["a".to_string()], &["b".to_string()]).is_none());
    }
}
