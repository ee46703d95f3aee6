use super::{Dimension, Label, Tensor, TensorType};
use crate::error::{Error, Result};

pub(crate) fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(is_plain_char)
}

fn is_plain_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

pub fn parse(ty: Option<&TensorType>, text: &str) -> Result<Tensor> {
    let trimmed = text.trim();
    let (declared, body) = match trimmed.strip_prefix("tensor") {
        Some(_) => {
            let close = trimmed
                .find(')')
                .ok_or_else(|| Error::parse(text, "unterminated tensor type"))?;
            let declared = TensorType::from_spec(&trimmed[..=close])?;
            let rest = trimmed[close + 1..].trim_start();
            let body = rest
                .strip_prefix(':')
                .ok_or_else(|| Error::parse(text, "expected ':' after the tensor type"))?;
            (Some(declared), body)
        }
        None => (None, trimmed),
    };
    let ty = match (declared, ty) {
        (Some(declared), Some(expected)) if &declared != expected => {
            return Err(Error::parse(
                text,
                format!("the value has type {} but {} was expected", declared, expected),
            ))
        }
        (Some(declared), _) => declared,
        (None, Some(expected)) => expected.clone(),
        (None, None) => TensorType::scalar(),
    };
    let mut cursor = Cursor {
        text,
        chars: body.chars().collect(),
        position: 0,
    };
    let tensor = cursor.body(ty)?;
    cursor.skip_whitespace();
    if cursor.position < cursor.chars.len() {
        return Err(cursor.error("unexpected trailing input"));
    }
    Ok(tensor)
}

struct Cursor<'a> {
    text: &'a str,
    chars: Vec<char>,
    position: usize,
}

impl Cursor<'_> {
    fn error(&self, message: &str) -> Error {
        Error::parse(self.text, format!("{} at {}", message, self.position))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.position += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn consume(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.consume(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    fn body(&mut self, ty: TensorType) -> Result<Tensor> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.cells(ty),
            Some('[') => {
                let mut values = Vec::new();
                let mut shape = Vec::new();
                self.dense(0, &mut shape, &mut None, &mut values)?;
                let shape: Vec<u64> = shape.into_iter().flatten().collect();
                let expected: Vec<u64> = ty.dimensions().iter().filter_map(Dimension::size).collect();
                if shape != expected {
                    return Err(self.error(&format!("dense values do not fit {}", ty)));
                }
                Tensor::dense(ty, &values)
            }
            _ => {
                if !ty.is_scalar() {
                    return Err(self.error(&format!("a bare number cannot be a {}", ty)));
                }
                Ok(Tensor::scalar(self.number()?))
            }
        }
    }

    fn cells(&mut self, ty: TensorType) -> Result<Tensor> {
        self.expect('{')?;
        let mut cells = Vec::new();
        if self.consume('}') {
            return Tensor::from_cells(ty, cells);
        }
        loop {
            self.expect('{')?;
            let mut address: Vec<Option<Label>> = vec![None; ty.rank()];
            if !self.consume('}') {
                loop {
                    let name = self.token()?;
                    let position = ty
                        .index_of(&name)
                        .ok_or_else(|| self.error(&format!("{} has no dimension '{}'", ty, name)))?;
                    self.expect(':')?;
                    let label = self.label(&ty.dimensions()[position])?;
                    address[position] = Some(label);
                    if self.consume('}') {
                        break;
                    }
                    self.expect(',')?;
                }
            }
            let address: Option<Vec<Label>> = address.into_iter().collect();
            let address = address.ok_or_else(|| self.error("a cell address must label every dimension"))?;
            self.expect(':')?;
            cells.push((address, self.number()?));
            if self.consume('}') {
                break;
            }
            self.expect(',')?;
        }
        Tensor::from_cells(ty, cells)
    }

    fn dense(
        &mut self,
        depth: usize,
        shape: &mut Vec<Option<u64>>,
        leaf_depth: &mut Option<usize>,
        values: &mut Vec<f64>,
    ) -> Result<()> {
        self.expect('[')?;
        if shape.len() <= depth {
            shape.resize(depth + 1, None);
        }
        let mut count = 0u64;
        if !self.consume(']') {
            loop {
                self.skip_whitespace();
                if self.peek() == Some('[') {
                    self.dense(depth + 1, shape, leaf_depth, values)?;
                } else {
                    if *leaf_depth.get_or_insert(depth) != depth {
                        return Err(self.error("inconsistent nesting of dense values"));
                    }
                    values.push(self.number()?);
                }
                count += 1;
                if self.consume(']') {
                    break;
                }
                self.expect(',')?;
            }
        }
        match shape[depth] {
            Some(size) if size != count => Err(self.error("ragged dense values")),
            Some(_) => Ok(()),
            None => {
                shape[depth] = Some(count);
                Ok(())
            }
        }
    }

    fn label(&mut self, dimension: &Dimension) -> Result<Label> {
        self.skip_whitespace();
        let key = if self.peek() == Some('"') {
            self.quoted()?
        } else {
            self.token()?
        };
        match dimension {
            Dimension::Mapped { .. } => Ok(Label::Key(key)),
            Dimension::Indexed { .. } => key
                .parse()
                .map(Label::Index)
                .map_err(|_| self.error(&format!("'{}' is not an index of {}", key, dimension))),
        }
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect('"')?;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted label")),
                Some('"') => {
                    self.position += 1;
                    return Ok(value);
                }
                Some('\\') => {
                    self.position += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    value.push(escaped);
                    self.position += 1;
                }
                Some(c) => {
                    value.push(c);
                    self.position += 1;
                }
            }
        }
    }

    fn token(&mut self) -> Result<String> {
        self.skip_whitespace();
        let start = self.position;
        while self.peek().map_or(false, is_plain_char) {
            self.position += 1;
        }
        if start == self.position {
            return Err(self.error("expected a name or label"));
        }
        Ok(self.chars[start..self.position].iter().collect())
    }

    fn number(&mut self) -> Result<f64> {
        self.skip_whitespace();
        let start = self.position;
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '+')
        {
            self.position += 1;
        }
        let text: String = self.chars[start..self.position].iter().collect();
        text.parse()
            .map_err(|_| self.error(&format!("'{}' is not a number", text)))
    }
}
