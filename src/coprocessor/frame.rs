//! Wire format: a bare sequence of IEEE-754 binary32 values, little-endian.
//!
//! No header, length prefix, or checksum. Both ends derive the frame length
//! from the shared device profile: `bins × 4` bytes.

use super::LinkError;
use crate::config::defaults::BYTES_PER_FLOAT;

/// Byte length of a frame carrying `bins` values.
pub const fn frame_len(bins: usize) -> usize {
    bins * BYTES_PER_FLOAT
}

/// Encode values as f32 LE. Precision beyond f32 is dropped.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame_len(values.len()));
    for &v in values {
        out.extend_from_slice(&(v as f32).to_le_bytes());
    }
    out
}

/// Decode exactly `bins` f32 LE values.
///
/// Values are returned as-is, including NaN or infinity; the receiving
/// spectrum type decides how to sanitize them.
pub fn decode_frame(bytes: &[u8], bins: usize) -> Result<Vec<f64>, LinkError> {
    let expected = frame_len(bins);
    if bytes.len() != expected {
        return Err(LinkError::FrameSize {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_FLOAT)
        .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect())
}
