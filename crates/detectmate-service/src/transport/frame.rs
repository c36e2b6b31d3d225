//! Length-prefixed message framing.
//!
//! Every payload is preceded by a 4-byte big-endian length. The cap bounds
//! memory per connection; anything larger is treated as a protocol violation.

use std::io::{self, Read, Write};

/// Maximum size of a single framed payload in bytes.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Writes one framed payload and flushes the stream.
pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let length = u32::try_from(payload.len())
        .ok()
        .filter(|length| *length as usize <= MAX_FRAME_BYTES)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds frame limit"))?;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads one framed payload, blocking until it is complete.
pub fn read_frame(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut header = [0_u8; 4];
    reader.read_exact(&mut header)?;
    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds size limit",
        ));
    }
    let mut payload = vec![0_u8; length];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Extracts one complete frame from an accumulation buffer, if present.
///
/// Used by the sliced socket readers, which interleave short reads with
/// close-flag checks and therefore cannot block in [`read_frame`].
pub(crate) fn extract_frame(buffer: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    if buffer.len() < 4 {
        return Ok(None);
    }
    let mut header = [0_u8; 4];
    header.copy_from_slice(&buffer[..4]);
    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds size limit",
        ));
    }
    if buffer.len() < 4 + length {
        return Ok(None);
    }
    let payload = buffer[4..4 + length].to_vec();
    buffer.drain(..4 + length);
    Ok(Some(payload))
}
