//! Encodes and decodes the length-delimited `.trk` spool record format.
//!
//! On-disk layout per record: `varint(8 + payload.len())`, then an 8-byte
//! big-endian `event_time_ms`, then `payload` verbatim. A record is never
//! written partially — callers must flush the full frame before releasing
//! the file lock, per the spool-file invariants.

use std::io::{self, Read, Write};

use crate::types::LogEvent;
use crate::varint;

const TIMESTAMP_WIDTH: usize = 8;

/// Writes one record as a single length-delimited frame.
pub fn write_event<W: Write>(writer: &mut W, event: &LogEvent) -> io::Result<()> {
    let body_len = TIMESTAMP_WIDTH + event.payload.len();
    varint::write_varint(writer, body_len as u64)?;
    writer.write_all(&event.event_time_ms.to_be_bytes())?;
    writer.write_all(&event.payload)?;
    Ok(())
}

/// Reads one record. Returns `Ok(None)` at a clean end-of-stream boundary.
pub fn read_event<R: Read>(reader: &mut R) -> io::Result<Option<LogEvent>> {
    let Some(body_len) = varint::read_varint(reader)? else {
        return Ok(None);
    };
    let body_len = body_len as usize;
    if body_len < TIMESTAMP_WIDTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "record body shorter than the fixed timestamp width",
        ));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body)?;

    let mut ts_bytes = [0u8; TIMESTAMP_WIDTH];
    ts_bytes.copy_from_slice(&body[..TIMESTAMP_WIDTH]);
    let event_time_ms = i64::from_be_bytes(ts_bytes);
    let payload = body[TIMESTAMP_WIDTH..].to_vec();

    Ok(Some(LogEvent::new(event_time_ms, payload)))
}

/// Reads every well-formed record from `reader` until a clean EOF.
///
/// A partial trailing record (truncated by a crash mid-write) surfaces as an
/// `UnexpectedEof` error rather than being silently dropped, since the spool
/// invariants guarantee writers never release their lock mid-record; any
/// truncation observed here indicates corruption worth surfacing to the
/// caller rather than hiding.
pub fn read_all_events<R: Read>(reader: &mut R) -> io::Result<Vec<LogEvent>> {
    let mut events = Vec::new();
    while let Some(event) = read_event(reader)? {
        events.push(event);
    }
    Ok(events)
}
