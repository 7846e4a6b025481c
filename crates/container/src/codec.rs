//! Fixed-width big-endian integer codec.
//!
//! Every length, offset, count and pointer in the container is a signed
//! 64-bit big-endian integer. Variable-length fields (names, keys, blobs) are
//! a length integer followed by that many raw bytes.

use crate::error::{ErrorKind, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use exn::ResultExt;
use std::io::{self, Read, Write};

/// Width in bytes of every integer field.
pub const WIDTH: usize = 8;

/// Encode `n` as 8 big-endian bytes.
#[inline]
#[must_use]
pub fn encode_i64(n: i64) -> [u8; WIDTH] {
    let mut buffer = [0; WIDTH];
    BigEndian::write_i64(&mut buffer, n);
    buffer
}

/// Decode the first 8 bytes of `bytes` as a big-endian integer.
///
/// Fails with [`Truncated`](ErrorKind::Truncated) instead of reading out of
/// bounds when fewer than 8 bytes are available.
pub fn decode_i64(bytes: &[u8]) -> Result<i64> {
    if bytes.len() < WIDTH {
        exn::bail!(ErrorKind::Truncated("integer"));
    }
    Ok(BigEndian::read_i64(&bytes[..WIDTH]))
}

pub fn write_i64<W: Write>(writer: &mut W, n: i64) -> Result<()> {
    writer.write_i64::<BigEndian>(n).or_raise(|| ErrorKind::Io)
}

/// Write an in-memory size (length, count or offset) as an integer field.
pub fn write_len<W: Write>(writer: &mut W, len: usize) -> Result<()> {
    let len = i64::try_from(len).or_raise(|| ErrorKind::Invariant("size exceeds 64-bit signed range"))?;
    write_i64(writer, len)
}

/// Write a length-prefixed byte string.
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    write_len(writer, bytes.len())?;
    writer.write_all(bytes).or_raise(|| ErrorKind::Io)
}

/// Read one integer field. `field` names what was being read, for the error.
pub fn read_i64<R: Read>(reader: &mut R, field: &'static str) -> Result<i64> {
    match reader.read_i64::<BigEndian>() {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => exn::bail!(ErrorKind::Truncated(field)),
        Err(e) => Err(e).or_raise(|| ErrorKind::Io),
    }
}

/// Read an integer field that must not be negative (lengths and counts).
pub fn read_len<R: Read>(reader: &mut R, field: &'static str) -> Result<u64> {
    let n = read_i64(reader, field)?;
    u64::try_from(n).or_raise(|| ErrorKind::CorruptFormat(field))
}

/// Read a length-prefixed byte string.
///
/// The buffer grows with the bytes actually present rather than trusting the
/// length field up front, so a corrupt length can't trigger a huge allocation.
pub fn read_bytes<R: Read>(reader: &mut R, field: &'static str) -> Result<Vec<u8>> {
    let len = read_len(reader, field)?;
    let mut buffer = Vec::new();
    reader.take(len).read_to_end(&mut buffer).or_raise(|| ErrorKind::Io)?;
    if (buffer.len() as u64) < len {
        exn::bail!(ErrorKind::Truncated(field));
    }
    Ok(buffer)
}

/// Read a length-prefixed UTF-8 string.
pub fn read_string<R: Read>(reader: &mut R, field: &'static str) -> Result<String> {
    let bytes = read_bytes(reader, field)?;
    String::from_utf8(bytes).or_raise(|| ErrorKind::CorruptFormat(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case(0, [0, 0, 0, 0, 0, 0, 0, 0])]
    #[case(1, [0, 0, 0, 0, 0, 0, 0, 1])]
    #[case(-1, [0xff; 8])]
    #[case(0x0102_0304_0506_0708, [1, 2, 3, 4, 5, 6, 7, 8])]
    #[case(0x6b6f_6d69_7361_6e77, *b"komisanw")]
    fn test_big_endian_layout(#[case] n: i64, #[case] expected: [u8; 8]) {
        assert_eq!(encode_i64(n), expected);
        assert_eq!(decode_i64(&expected).unwrap(), n);
    }

    #[rstest]
    #[case(i64::MIN)]
    #[case(i64::MAX)]
    #[case(-40)]
    fn test_extremes_survive(#[case] n: i64) {
        assert_eq!(decode_i64(&encode_i64(n)).unwrap(), n);
    }

    #[test]
    fn test_decode_short_buffer_is_truncated() {
        let err = decode_i64(&[0, 0, 1]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Truncated(_)));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = encode_i64(42).to_vec();
        bytes.extend_from_slice(b"trailing");
        assert_eq!(decode_i64(&bytes).unwrap(), 42);
    }

    #[test]
    fn test_read_i64_eof_is_truncated() {
        let mut reader = Cursor::new(vec![0u8; 5]);
        let err = read_i64(&mut reader, "count").unwrap_err();
        assert_eq!(*err, ErrorKind::Truncated("count"));
    }

    #[test]
    fn test_length_prefixed_bytes() {
        let mut buffer = Vec::new();
        write_bytes(&mut buffer, b"AAAA").unwrap();
        write_bytes(&mut buffer, b"").unwrap();
        assert_eq!(buffer.len(), 8 + 4 + 8);
        let mut reader = Cursor::new(buffer);
        assert_eq!(read_bytes(&mut reader, "blob").unwrap(), b"AAAA");
        assert!(read_bytes(&mut reader, "blob").unwrap().is_empty());
    }

    #[test]
    fn test_length_longer_than_data_is_truncated() {
        let mut buffer = encode_i64(10).to_vec();
        buffer.extend_from_slice(b"short");
        let err = read_bytes(&mut Cursor::new(buffer), "blob").unwrap_err();
        assert_eq!(*err, ErrorKind::Truncated("blob"));
    }

    #[test]
    fn test_negative_length_is_corrupt() {
        let buffer = encode_i64(-3).to_vec();
        let err = read_bytes(&mut Cursor::new(buffer), "name").unwrap_err();
        assert_eq!(*err, ErrorKind::CorruptFormat("name"));
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let mut buffer = Vec::new();
        write_bytes(&mut buffer, &[0xff, 0xfe]).unwrap();
        let err = read_string(&mut Cursor::new(buffer), "key").unwrap_err();
        assert_eq!(*err, ErrorKind::CorruptFormat("key"));
    }
}
