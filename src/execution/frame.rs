//! Length-prefixed framing used in both directions of the container exchange.
//!
//! A frame is a 4-byte big-endian payload length followed by the payload.

use std::io::{self, Read, Write};

use thiserror::Error;

pub const LENGTH_PREFIX_BYTES: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame io: {0}")]
    Io(#[from] io::Error),
    /// The stream ended inside the length prefix or the payload.
    #[error("stream closed after {read} of {expected} frame bytes")]
    Truncated { expected: usize, read: usize },
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u64, max: u64 },
}

/// Writes one frame and flushes the sink.
pub fn write_frame<W: Write + ?Sized>(sink: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len() as u64,
        max: u64::from(u32::MAX),
    })?;
    sink.write_all(&len.to_be_bytes())?;
    sink.write_all(payload)?;
    sink.flush()?;
    Ok(())
}

/// Reads exactly one frame, rejecting declared lengths above `max_len`
/// before allocating.
pub fn read_frame<R: Read + ?Sized>(source: &mut R, max_len: u32) -> Result<Vec<u8>, FrameError> {
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    read_full(source, &mut prefix)?;
    let len = u32::from_be_bytes(prefix);
    if len > max_len {
        return Err(FrameError::TooLarge {
            len: u64::from(len),
            max: u64::from(max_len),
        });
    }
    let mut payload = vec![0u8; len as usize];
    read_full(source, &mut payload)?;
    Ok(payload)
}

fn read_full<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(FrameError::Truncated {
                    expected: buf.len(),
                    read: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(())
}
