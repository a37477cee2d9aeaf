use crate::error::{Error, Result};
use crate::util::ZeroCopy;
use bson::{to_vec, Bson, Document};
use std::mem;

/// Appends the raw bytes of a **single BSON element with an empty field
/// name** (`<type-byte> 0x00 <value bytes>`) to `buf`.
///
/// Serializes a 1-field document and slices away the outer framing:
/// [i32 size][element ...][0x00 terminator]
pub fn append_value_element(buf: &mut Vec<u8>, value: &Bson) -> Result<()> {
    let mut doc = Document::new();
    doc.insert("", value.clone());

    let mut bytes = to_vec(&doc)?; // full document bytes
    bytes.pop(); // drop trailing 0
    buf.extend_from_slice(&bytes[4..]); // drop 4-byte size header
    Ok(())
}

/// Reads a single BSON element with an empty field name from the start of
/// `buf`, returning the materialized value and the number of bytes consumed
/// (type byte + name terminator + value bytes).
pub fn read_value_element(buf: &[u8]) -> Result<(Bson, usize)> {
    if buf.len() < 2 {
        return Err(Error::CorruptedDiff(
            "truncated value element".to_string(),
        ));
    }
    let tag = buf[0];
    if buf[1] != 0 {
        return Err(Error::CorruptedDiff(
            "value element must carry an empty field name".to_string(),
        ));
    }
    let value_size = raw_value_size(tag, &buf[2..])?;
    let consumed = 2 + value_size;

    // Re-frame as a complete 1-field document so the bson crate can decode it.
    let total = 4 + consumed + 1;
    let mut doc_bytes = Vec::with_capacity(total);
    doc_bytes.extend_from_slice(&(total as i32).to_le_bytes());
    doc_bytes.extend_from_slice(&buf[..consumed]);
    doc_bytes.push(0);

    let doc = Document::from_reader(&mut doc_bytes.as_slice())
        .map_err(|e| Error::CorruptedDiff(format!("bad value element: {}", e)))?;
    let value = doc
        .into_iter()
        .next()
        .map(|(_, v)| v)
        .ok_or_else(|| Error::CorruptedDiff("empty value element".to_string()))?;
    Ok((value, consumed))
}

/// Size in bytes of an encoded BSON value of type `tag`, with `buf` starting
/// at the first value byte. Length-prefixed types read their own prefix;
/// nothing past the reported size is touched.
pub fn raw_value_size(tag: u8, buf: &[u8]) -> Result<usize> {
    let size = match tag {
        0x01 => 8,                             // double
        0x02 | 0x0D | 0x0E => 4 + read_len(buf)?, // string, code, symbol
        0x03 | 0x04 | 0x0F => read_len(buf)?,  // document, array, code w/ scope
        0x05 => 4 + 1 + read_len(buf)?,        // binary
        0x06 | 0x0A => 0,                      // undefined, null
        0x07 => 12,                            // object id
        0x08 => 1,                             // boolean
        0x09 => 8,                             // datetime
        0x0B => {
            // regex: two consecutive cstrings
            let first = cstr_len(buf)?;
            first + cstr_len(&buf[first..])?
        }
        0x0C => 4 + read_len(buf)? + 12,       // db pointer
        0x10 => 4,                             // int32
        0x11 => 8,                             // timestamp
        0x12 => 8,                             // int64
        0x13 => 16,                            // decimal128
        0x7F | 0xFF => 0,                      // max key, min key
        _ => {
            return Err(Error::CorruptedDiff(format!(
                "unknown BSON type byte: {:#04x}",
                tag
            )))
        }
    };
    if size > buf.len() {
        return Err(Error::CorruptedDiff(
            "value overruns the enclosing buffer".to_string(),
        ));
    }
    Ok(size)
}

fn read_len(buf: &[u8]) -> Result<usize> {
    if buf.len() < 4 {
        return Err(Error::CorruptedDiff(
            "truncated length prefix".to_string(),
        ));
    }
    let len = buf.read_i32_le(0);
    if len < 0 {
        return Err(Error::CorruptedDiff("negative length prefix".to_string()));
    }
    Ok(len as usize)
}

fn cstr_len(buf: &[u8]) -> Result<usize> {
    buf.iter()
        .position(|&b| b == 0)
        .map(|p| p + 1)
        .ok_or_else(|| Error::CorruptedDiff("unterminated cstring".to_string()))
}

/// Byte-level equality of two BSON values, as they would appear on the wire.
/// Distinguishes values that compare equal numerically but encode differently
/// (e.g. `Int32(1)` vs `Int64(1)`, `0.0` vs `-0.0`).
pub fn binary_eq(a: &Bson, b: &Bson) -> Result<bool> {
    if mem::discriminant(a) != mem::discriminant(b) {
        return Ok(false);
    }
    let mut buf_a = Vec::new();
    let mut buf_b = Vec::new();
    append_value_element(&mut buf_a, a)?;
    append_value_element(&mut buf_b, b)?;
    Ok(buf_a == buf_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_element_round_trip() {
        let values = vec![
            Bson::Int32(42),
            Bson::Int64(-7),
            Bson::Double(3.25),
            Bson::String("hello".to_string()),
            Bson::Boolean(true),
            Bson::Null,
            Bson::Document(doc! {"a": 1, "b": [1, 2]}),
            Bson::Array(vec![Bson::Int32(1), Bson::String("x".to_string())]),
        ];
        for value in values {
            let mut buf = Vec::new();
            append_value_element(&mut buf, &value).unwrap();
            let (decoded, consumed) = read_value_element(&buf).unwrap();
            assert_eq!(consumed, buf.len());
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_read_stops_at_element_boundary() {
        let mut buf = Vec::new();
        append_value_element(&mut buf, &Bson::Int32(7)).unwrap();
        let first_len = buf.len();
        append_value_element(&mut buf, &Bson::String("tail".to_string())).unwrap();

        let (first, consumed) = read_value_element(&buf).unwrap();
        assert_eq!(first, Bson::Int32(7));
        assert_eq!(consumed, first_len);
        let (second, _) = read_value_element(&buf[consumed..]).unwrap();
        assert_eq!(second, Bson::String("tail".to_string()));
    }

    #[test]
    fn test_binary_eq_distinguishes_numeric_types() {
        assert!(binary_eq(&Bson::Int32(1), &Bson::Int32(1)).unwrap());
        assert!(!binary_eq(&Bson::Int32(1), &Bson::Int64(1)).unwrap());
        assert!(!binary_eq(&Bson::Double(0.0), &Bson::Double(-0.0)).unwrap());
    }

    #[test]
    fn test_binary_eq_documents() {
        let a = Bson::Document(doc! {"x": 1, "y": 2});
        let b = Bson::Document(doc! {"x": 1, "y": 2});
        let c = Bson::Document(doc! {"y": 2, "x": 1});
        assert!(binary_eq(&a, &b).unwrap());
        assert!(!binary_eq(&a, &c).unwrap());
    }

    #[test]
    fn test_truncated_element_is_an_error() {
        let mut buf = Vec::new();
        append_value_element(&mut buf, &Bson::String("hello".to_string())).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(read_value_element(&buf).is_err());
    }
}
