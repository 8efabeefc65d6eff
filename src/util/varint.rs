//! Variable-length integer encoding utilities.
//!
//! LEB128-style encoding: 7 bits per byte with a continuation bit. Used by the
//! shard file format for key/value lengths and by the posting codec for
//! position lists.

use crate::error::{GridShardError, Result};

/// Maximum encoded length of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Append a u64 value to `buf` using variable-length encoding.
///
/// Returns the number of bytes written.
pub fn put_u64(buf: &mut Vec<u8>, value: u64) -> usize {
    let mut val = value;
    let mut written = 0;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        buf.push(byte);
        written += 1;

        if val == 0 {
            return written;
        }
    }
}

/// Encode a u64 value into a fresh buffer.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_LEN);
    put_u64(&mut bytes, value);
    bytes
}

/// Decode a u64 value from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return Err(GridShardError::corrupt("varint overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(GridShardError::corrupt("incomplete varint"))
}

/// Decode a u64 at `*pos`, advancing `*pos` past it.
pub fn get_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let tail = bytes
        .get(*pos..)
        .ok_or_else(|| GridShardError::corrupt("varint offset out of range"))?;
    let (value, len) = decode_u64(tail)?;
    *pos += len;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_get_advances_position() {
        let mut buf = Vec::new();
        put_u64(&mut buf, 300);
        put_u64(&mut buf, 5);

        let mut pos = 0;
        assert_eq!(get_u64(&buf, &mut pos).unwrap(), 300);
        assert_eq!(pos, 2);
        assert_eq!(get_u64(&buf, &mut pos).unwrap(), 5);
        assert_eq!(pos, buf.len());
        assert!(get_u64(&buf, &mut pos).is_err());
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encode_u64(0).len(), 1);
        assert_eq!(encode_u64(127).len(), 1);
        assert_eq!(encode_u64(128).len(), 2);
        assert_eq!(encode_u64(16384).len(), 3);
        assert_eq!(encode_u64(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_incomplete_varint() {
        let incomplete = vec![0x80];
        assert!(matches!(
            decode_u64(&incomplete),
            Err(GridShardError::CorruptEncoding(_))
        ));
    }

    #[test]
    fn test_overflow() {
        let overflow_data = vec![0xFF; 11];
        assert!(decode_u64(&overflow_data).is_err());
    }
}
