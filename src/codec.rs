//! Wire codec: CBOR maps via serde plus little-endian array packing
//!
//! Every published message is one definite-length CBOR map with text keys,
//! produced from a `#[derive(Serialize)]` struct whose field order is the key
//! order on the wire. The raw sample arrays carried inside byte strings are
//! little-endian.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Encoding and decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Value could not be written as CBOR
    #[error("CBOR encode failed: {0}")]
    Encode(String),

    /// Input is not a well-formed message map
    #[error("malformed CBOR message: {0}")]
    Malformed(String),

    /// Packed array length is not a multiple of 2
    #[error("packed array has odd length {0}")]
    OddLength(usize),

    /// The message type tag is not known
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

/// Serialise a value as one CBOR item
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(format!("{:?}", e)))?;
    Ok(buf)
}

/// Deserialise one CBOR item
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Malformed(format!("{:?}", e)))
}

/// Pack `u16` values as little-endian bytes
pub fn pack_u16_le(values: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Pack `i16` values as little-endian bytes
pub fn pack_i16_le(values: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn unpack_u16_le(bytes: &[u8]) -> Result<Vec<u16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

pub fn unpack_i16_le(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Small {
        n: u16,
        #[serde(with = "serde_bytes")]
        a: Vec<u8>,
    }

    #[test]
    fn test_struct_is_a_text_keyed_map() {
        let bytes = to_cbor(&Small { n: 500, a: vec![1, 2] }).unwrap();
        assert_eq!(
            bytes,
            vec![0xA2, 0x61, b'n', 0x19, 0x01, 0xF4, 0x61, b'a', 0x42, 1, 2]
        );
        assert_eq!(from_cbor::<Small>(&bytes).unwrap(), Small { n: 500, a: vec![1, 2] });
    }

    #[test]
    fn test_truncated_input() {
        let bytes = to_cbor(&Small { n: 1, a: vec![0u8; 40] }).unwrap();
        let err = from_cbor::<Small>(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_rejects_non_map() {
        assert!(matches!(from_cbor::<Small>(&[0x01]), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_le_packing_edge_values() {
        let unsigned = [0u16, 1, 32767, 65535];
        let packed = pack_u16_le(&unsigned);
        assert_eq!(packed.len(), unsigned.len() * 2);
        assert_eq!(&packed[..4], &[0x00, 0x00, 0x01, 0x00]);
        assert_eq!(&packed[6..], &[0xFF, 0xFF]);
        assert_eq!(unpack_u16_le(&packed).unwrap(), unsigned);

        let signed = [0i16, 1, -1, 32767, -32768];
        let packed = pack_i16_le(&signed);
        assert_eq!(&packed[4..6], &[0xFF, 0xFF]);
        assert_eq!(&packed[6..8], &[0xFF, 0x7F]);
        assert_eq!(&packed[8..], &[0x00, 0x80]);
        assert_eq!(unpack_i16_le(&packed).unwrap(), signed);
    }

    #[test]
    fn test_unpack_odd_length() {
        assert_eq!(unpack_u16_le(&[1, 2, 3]).unwrap_err(), CodecError::OddLength(3));
        assert_eq!(unpack_i16_le(&[1]).unwrap_err(), CodecError::OddLength(1));
    }
}
