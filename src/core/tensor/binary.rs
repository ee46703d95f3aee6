use super::{Dimension, Label, Tensor, TensorType};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

const MAGIC: &[u8; 4] = b"TBF1";

/// Big endian: magic `TBF1`, u32 type spec length, type spec, u64 cell
/// count, then per cell one label per dimension (u64 index, or u32 length +
/// UTF-8 key) and the f64 value.
pub fn encode(tensor: &Tensor) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(16 + tensor.len() * 16);
    write_tensor(&mut buffer, tensor)
        .map_err(|e| Error::evaluation(format!("Could not encode {}: {}", tensor.ty(), e)))?;
    Ok(buffer)
}

fn write_tensor<W: Write>(writer: &mut W, tensor: &Tensor) -> std::io::Result<()> {
    writer.write_all(MAGIC)?;
    write_string(writer, &tensor.ty().to_string())?;
    writer.write_u64::<BigEndian>(tensor.len() as u64)?;
    for (address, value) in tensor.cells() {
        for label in address {
            match label {
                Label::Index(i) => writer.write_u64::<BigEndian>(*i)?,
                Label::Key(key) => write_string(writer, key)?,
            }
        }
        writer.write_f64::<BigEndian>(*value)?;
    }
    Ok(())
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> std::io::Result<()> {
    let length = u32::try_from(s.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "string longer than u32::MAX bytes"))?;
    writer.write_u32::<BigEndian>(length)?;
    writer.write_all(s.as_bytes())
}

pub fn decode(data: &[u8]) -> Result<Tensor> {
    let mut reader = Cursor::new(data);
    let corrupt = |e: std::io::Error| Error::parse("<binary tensor>", e.to_string());

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(corrupt)?;
    if &magic != MAGIC {
        return Err(Error::parse("<binary tensor>", "not a typed binary format tensor"));
    }
    let ty = TensorType::from_spec(&read_string(&mut reader).map_err(corrupt)?)?;
    let count = reader.read_u64::<BigEndian>().map_err(corrupt)?;

    let mut cells = Vec::new();
    for _ in 0..count {
        let mut address = Vec::with_capacity(ty.rank());
        for dimension in ty.dimensions() {
            let label = match dimension {
                Dimension::Indexed { .. } => Label::Index(reader.read_u64::<BigEndian>().map_err(corrupt)?),
                Dimension::Mapped { .. } => Label::Key(read_string(&mut reader).map_err(corrupt)?),
            };
            address.push(label);
        }
        cells.push((address, reader.read_f64::<BigEndian>().map_err(corrupt)?));
    }
    if (reader.position() as usize) != data.len() {
        return Err(Error::parse("<binary tensor>", "trailing bytes after the last cell"));
    }
    Tensor::from_cells(ty, cells)
}

fn read_string(reader: &mut Cursor<&[u8]>) -> std::io::Result<String> {
    let length = reader.read_u32::<BigEndian>()? as usize;
    let remaining = reader.get_ref().len().saturating_sub(reader.position() as usize);
    if length > remaining {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("string of {} bytes with {} bytes left", length, remaining),
        ));
    }
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_tensor_survives_encoding() {
        let t: Tensor = "tensor(k{},x[2]):{{k:a,x:0}:1.5,{k:\"b,c\",x:1}:-2.0}".parse().unwrap();
        assert_eq!(decode(&encode(&t).unwrap()).unwrap(), t);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode(b"nope").is_err());
        let mut data = encode(&Tensor::scalar(1.0)).unwrap();
        data.push(0);
        assert!(decode(&data).is_err());
        let data = encode(&"tensor(x[3]):[1,2,3]".parse().unwrap()).unwrap();
        assert!(decode(&data[..data.len() - 3]).is_err());
    }

    #[test]
    fn test_oversized_string_length_is_rejected() {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(b"tensor()");
        let err = decode(&data).unwrap_err();
        assert!(err.to_string().contains("bytes left"), "{}", err);
    }
}
