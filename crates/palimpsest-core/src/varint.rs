//! Variable-Length Integer Encoding for the Patch Wire Format
//!
//! Patch operations are dominated by span lengths, and most spans are short:
//! a typical wiki edit touches a few dozen bytes inside a page of tens of
//! kilobytes. Fixed 8-byte lengths would double the size of small patches
//! before compression even runs, so lengths are written as LEB128 varints —
//! 7 bits of payload per byte, high bit as the continuation flag.
//!
//! Unlike an offset-delta stream there are no negative values here (spans
//! are lengths), so no zigzag mapping is needed.
//!
//! Decoding is fallible by design: patch bytes are read back from storage
//! and may be truncated or corrupt, which must surface as a malformed-patch
//! error rather than a panic.

use bytes::{Buf, BufMut};

use crate::{Error, Result};

/// Encode an unsigned integer as a varint.
pub fn encode_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode a varint back to an unsigned integer.
///
/// Fails on truncated input and on encodings longer than 10 bytes (which
/// cannot come from `encode_u64`).
pub fn decode_u64(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::MalformedPatch("truncated varint".to_string()));
        }
        if shift >= 64 {
            return Err(Error::MalformedPatch("oversized varint".to_string()));
        }

        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(value);
        }

        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(value: u64) -> u64 {
        let mut buf = BytesMut::new();
        encode_u64(&mut buf, value);
        decode_u64(&mut buf.as_ref()).unwrap()
    }

    #[test]
    fn test_varint_zero() {
        assert_eq!(roundtrip(0), 0);
    }

    #[test]
    fn test_varint_single_byte_range() {
        for value in 0..=127 {
            assert_eq!(roundtrip(value), value);
        }
    }

    #[test]
    fn test_varint_boundaries() {
        for value in [128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            assert_eq!(roundtrip(value), value, "failed for {value}");
        }
    }

    #[test]
    fn test_varint_byte_lengths() {
        let mut buf = BytesMut::new();
        encode_u64(&mut buf, 127);
        assert_eq!(buf.len(), 1);

        let mut buf = BytesMut::new();
        encode_u64(&mut buf, 128);
        assert_eq!(buf.len(), 2);

        let mut buf = BytesMut::new();
        encode_u64(&mut buf, u64::MAX);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_truncated_varint_is_error() {
        let mut buf = BytesMut::new();
        encode_u64(&mut buf, u64::MAX);
        let truncated = &buf[..buf.len() - 1];
        assert!(decode_u64(&mut &truncated[..]).is_err());
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(decode_u64(&mut &[][..]).is_err());
    }

    #[test]
    fn test_oversized_varint_is_error() {
        // Eleven continuation bytes cannot come from encode_u64.
        let bytes = [0x80u8; 11];
        assert!(decode_u64(&mut &bytes[..]).is_err());
    }
}
