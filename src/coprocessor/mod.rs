//! Coprocessor Link - offloading the spectral transform over a byte stream
//!
//! The high tier ships each magnitude spectrum to a coprocessor and reads
//! back the transformed spectrum. One request may be outstanding at a time.
//!
//! ```text
//!   Idle ──send()──▶ AwaitingResponse ──poll()──▶ Idle
//!                                       (every outcome)
//! ```
//!
//! The stream is anything `AsyncRead + AsyncWrite`: a serial port adapter in
//! the field, a TCP connection to the `coprocessor` binary on a host, or an
//! in-memory duplex pipe in tests.

mod frame;
mod service;

pub use frame::{decode_frame, encode_frame, frame_len};
pub use service::CoprocessorService;

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{bin_count, DeviceProfile, MagnitudeSpectrum, TransformedSpectrum};

// ============================================================================
// Errors and State
// ============================================================================

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("No response from coprocessor within {0:?}")]
    Timeout(Duration),

    #[error("Truncated response: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Request already outstanding")]
    Busy,

    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("No request outstanding")]
    NotAwaiting,

    #[error("Coprocessor closed the stream")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    AwaitingResponse,
}

/// Any bidirectional byte stream the link can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Link over a type-erased stream, as built from config at startup.
pub type BoxedLink = CoprocessorLink<Box<dyn ByteStream>>;

// ============================================================================
// Coprocessor Link
// ============================================================================

/// Request side of the offload protocol.
pub struct CoprocessorLink<S> {
    stream: S,
    bins: usize,
    state: LinkState,
    stale_bytes_dropped: u64,
}

impl<S> std::fmt::Debug for CoprocessorLink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoprocessorLink")
            .field("bins", &self.bins)
            .field("state", &self.state)
            .finish()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> CoprocessorLink<S> {
    /// Link exchanging frames of `bins` values.
    pub fn new(stream: S, bins: usize) -> Self {
        Self {
            stream,
            bins,
            state: LinkState::Idle,
            stale_bytes_dropped: 0,
        }
    }

    pub fn for_profile(stream: S, profile: &DeviceProfile) -> Self {
        Self::new(stream, bin_count(profile.sample_count()))
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn frame_len(&self) -> usize {
        frame_len(self.bins)
    }

    /// Total bytes discarded because they arrived outside a request.
    pub fn stale_bytes_dropped(&self) -> u64 {
        self.stale_bytes_dropped
    }

    /// Transmit one magnitude spectrum as a request frame.
    pub async fn send(&mut self, spectrum: &MagnitudeSpectrum) -> Result<(), LinkError> {
        if self.state == LinkState::AwaitingResponse {
            return Err(LinkError::Busy);
        }
        if spectrum.len() != self.bins {
            return Err(LinkError::FrameSize {
                expected: self.frame_len(),
                actual: frame_len(spectrum.len()),
            });
        }

        self.drain_stale().await?;

        let frame = encode_frame(spectrum.bins());
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.state = LinkState::AwaitingResponse;
        debug!(bytes = frame.len(), "[Coprocessor] Request sent");
        Ok(())
    }

    /// Wait up to `timeout` for the full response frame.
    ///
    /// A partial frame is discarded. The link is `Idle` afterwards no matter
    /// how the wait ended.
    pub async fn poll(&mut self, timeout: Duration) -> Result<TransformedSpectrum, LinkError> {
        if self.state != LinkState::AwaitingResponse {
            return Err(LinkError::NotAwaiting);
        }
        self.state = LinkState::Idle;

        let expected = self.frame_len();
        let mut buf = vec![0u8; expected];
        let mut filled = 0;
        let deadline = Instant::now() + timeout;

        while filled < expected {
            match tokio::time::timeout_at(deadline, self.stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) if filled == 0 => return Err(LinkError::Closed),
                Ok(Ok(0)) | Err(_) if filled > 0 => {
                    warn!(expected, received = filled, "[Coprocessor] Truncated response discarded");
                    return Err(LinkError::Truncated {
                        expected,
                        received: filled,
                    });
                }
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(LinkError::Io(e)),
                Err(_) => return Err(LinkError::Timeout(timeout)),
            }
        }

        let values = decode_frame(&buf, self.bins)?;
        debug!(bins = values.len(), "[Coprocessor] Response received");
        Ok(TransformedSpectrum::from_values(values))
    }

    /// `send` then `poll`.
    pub async fn exchange(
        &mut self,
        spectrum: &MagnitudeSpectrum,
        timeout: Duration,
    ) -> Result<TransformedSpectrum, LinkError> {
        self.send(spectrum).await?;
        self.poll(timeout).await
    }

    /// Discard bytes already buffered on the stream, e.g. the tail of a
    /// response that arrived after its request timed out.
    async fn drain_stale(&mut self) -> Result<(), LinkError> {
        let mut scratch = [0u8; 256];
        let mut dropped = 0usize;
        loop {
            match tokio::time::timeout(Duration::ZERO, self.stream.read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => dropped += n,
                Ok(Err(e)) => return Err(LinkError::Io(e)),
            }
        }
        if dropped > 0 {
            self.stale_bytes_dropped += dropped as u64;
            warn!(bytes = dropped, "[Coprocessor] Dropped stale bytes before request");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn spectrum(len: usize) -> MagnitudeSpectrum {
        MagnitudeSpectrum::from_bins((0..len).map(|i| i as f64 * 0.5).collect()).expect("valid")
    }

    #[tokio::test]
    async fn test_well_formed_response_decodes() {
        let (near, mut far) = duplex(1024);
        let mut link = CoprocessorLink::new(near, 3);

        link.send(&spectrum(3)).await.expect("send");
        assert_eq!(link.state(), LinkState::AwaitingResponse);

        let mut request = [0u8; 12];
        far.read_exact(&mut request).await.expect("request");
        assert_eq!(decode_frame(&request, 3).expect("decode"), vec![0.0, 0.5, 1.0]);

        far.write_all(&encode_frame(&[0.25, -0.5, f64::NAN])).await.expect("reply");
        let reply = link.poll(Duration::from_millis(500)).await.expect("poll");
        assert_eq!(reply.values(), &[0.25, -0.5, 0.0]);
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_second_send_is_busy() {
        let (near, _far) = duplex(1024);
        let mut link = CoprocessorLink::new(near, 2);
        link.send(&spectrum(2)).await.expect("send");
        assert!(matches!(link.send(&spectrum(2)).await, Err(LinkError::Busy)));
    }

    #[tokio::test]
    async fn test_wrong_spectrum_length_rejected() {
        let (near, _far) = duplex(1024);
        let mut link = CoprocessorLink::new(near, 4);
        let result = link.send(&spectrum(3)).await;
        assert!(matches!(result, Err(LinkError::FrameSize { expected: 16, actual: 12 })));
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let (near, _far) = duplex(1024);
        let mut link = CoprocessorLink::new(near, 2);
        link.send(&spectrum(2)).await.expect("send");
        let result = link.poll(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(LinkError::Timeout(_))));
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_poll_without_request() {
        let (near, _far) = duplex(64);
        let mut link = CoprocessorLink::new(near, 2);
        assert!(matches!(
            link.poll(Duration::from_millis(10)).await,
            Err(LinkError::NotAwaiting)
        ));
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let (near, far) = duplex(1024);
        let mut link = CoprocessorLink::new(near, 2);
        link.send(&spectrum(2)).await.expect("send");
        drop(far);
        assert!(matches!(
            link.poll(Duration::from_millis(200)).await,
            Err(LinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_late_bytes_are_drained_before_next_request() {
        let (near, mut far) = duplex(1024);
        let mut link = CoprocessorLink::new(near, 2);

        link.send(&spectrum(2)).await.expect("send");
        let _ = link.poll(Duration::from_millis(10)).await;

        // Response to the timed-out request arrives late
        far.write_all(&encode_frame(&[9.0, 9.0])).await.expect("late write");
        tokio::task::yield_now().await;

        link.send(&spectrum(2)).await.expect("send");
        assert_eq!(link.stale_bytes_dropped(), 8);

        let mut request = [0u8; 16];
        far.read_exact(&mut request).await.expect("two requests");
        far.write_all(&encode_frame(&[1.0, 2.0])).await.expect("reply");
        let reply = link.poll(Duration::from_millis(500)).await.expect("poll");
        assert_eq!(reply.values(), &[1.0, 2.0]);
    }
}
