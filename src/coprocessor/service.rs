//! Response side of the offload protocol.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::{decode_frame, encode_frame, frame_len, LinkError};
use crate::processing::SpectralTransform;
use crate::types::{DeviceProfile, MagnitudeSpectrum};

/// Reads magnitude frames, answers each with its transformed spectrum.
#[derive(Debug, Clone)]
pub struct CoprocessorService {
    bins: usize,
    transform: SpectralTransform,
    served: u64,
}

impl CoprocessorService {
    pub fn new(bins: usize, transform: SpectralTransform) -> Self {
        Self {
            bins,
            transform,
            served: 0,
        }
    }

    pub fn for_profile(profile: &DeviceProfile) -> Self {
        Self::new(profile.bin_count(), SpectralTransform::from_profile(profile))
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    /// Answer one request. `Ok(false)` when the peer closed cleanly between frames.
    pub async fn serve_one<S>(&mut self, stream: &mut S) -> Result<bool, LinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let expected = frame_len(self.bins);
        let mut buf = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(LinkError::Truncated {
                    expected,
                    received: filled,
                });
            }
            filled += n;
        }

        // Peer magnitudes are clamped rather than trusted
        let magnitudes = MagnitudeSpectrum::from_bins_lossy(decode_frame(&buf, self.bins)?);
        let transformed = self.transform.transform(&magnitudes);

        stream.write_all(&encode_frame(transformed.values())).await?;
        stream.flush().await?;
        self.served += 1;
        debug!(served = self.served, "[Coprocessor] Frame transformed");
        Ok(true)
    }

    /// Answer requests until the peer disconnects.
    pub async fn serve<S>(&mut self, stream: &mut S) -> Result<(), LinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while self.serve_one(stream).await? {}
        info!(served = self.served, "[Coprocessor] Peer disconnected");
        Ok(())
    }
}
