//! Length-delimited record framing for spooled events.
//!
//! Each record on disk is `varint(len(body)) || body`, where `body` is an
//! 8-byte big-endian timestamp followed by the event payload. Using an
//! unsigned LEB128 varint for the length keeps small, frequent records cheap
//! to frame without pulling in a full serialization crate for the envelope.

use std::io::{self, Read, Write};

/// Writes `value` as an unsigned LEB128 varint.
pub fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_all(&[byte])?;
        if value == 0 {
            return Ok(());
        }
    }
}

/// Reads an unsigned LEB128 varint. Returns `Ok(None)` if the reader is at a
/// clean boundary (zero bytes available before the first byte of the varint);
/// any other truncation is an `UnexpectedEof` error.
pub fn read_varint<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut first = true;

    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte)? {
            0 if first => return Ok(None),
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated varint length prefix",
                ))
            }
            _ => {}
        }
        first = false;

        result |= ((byte[0] & 0x7f) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(result));
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint length prefix too long",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_and_large_values() {
        for value in [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value).unwrap();
            let mut cursor = &buf[..];
            assert_eq!(read_varint(&mut cursor).unwrap(), Some(value));
        }
    }

    #[test]
    fn empty_reader_yields_none() {
        let mut cursor: &[u8] = &[];
        assert_eq!(read_varint(&mut cursor).unwrap(), None);
    }

    #[test]
    fn truncated_varint_is_an_error() {
        let mut cursor: &[u8] = &[0x80];
        assert!(read_varint(&mut cursor).is_err());
    }
}
