//! Spectral magnitude estimation using rustfft
//!
//! One-sided magnitude spectrum of a real acquisition window:
//!
//! ```text
//! mag[k] = |X[k]| / N,   k = 0..=N/2
//! ```
//!
//! The FFT is planned once per window length. rustfft picks a mixed-radix
//! algorithm, so N = 4000 and N = 8000 are transformed without zero-padding.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use super::ProcessingError;
use crate::types::{bin_count, DeviceProfile, MagnitudeSpectrum, SampleBuffer};

/// Pre-planned estimator for one fixed window length.
pub struct SpectralEstimator {
    fft: Arc<dyn Fft<f64>>,
    size: usize,
}

impl std::fmt::Debug for SpectralEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralEstimator")
            .field("size", &self.size)
            .finish()
    }
}

impl SpectralEstimator {
    /// Plan a forward FFT of `size` points.
    pub fn new(size: usize) -> Result<Self, ProcessingError> {
        if size == 0 {
            return Err(ProcessingError::InvalidInput(
                "FFT size must be at least 1".to_string(),
            ));
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        Ok(Self { fft, size })
    }

    /// Estimator sized for a device profile's acquisition window.
    pub fn for_profile(profile: &DeviceProfile) -> Result<Self, ProcessingError> {
        Self::new(profile.sample_count())
    }

    /// Window length this estimator was planned for.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of bins in every spectrum this estimator produces.
    pub fn bin_count(&self) -> usize {
        bin_count(self.size)
    }

    /// Compute the magnitude spectrum of one acquisition window.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty buffer or any non-finite sample
    /// - `BufferLength` when the buffer is not exactly `size()` samples
    pub fn estimate(&self, buffer: &SampleBuffer) -> Result<MagnitudeSpectrum, ProcessingError> {
        if buffer.is_empty() {
            return Err(ProcessingError::InvalidInput("empty sample buffer".to_string()));
        }
        if buffer.len() != self.size {
            return Err(ProcessingError::BufferLength {
                expected: self.size,
                actual: buffer.len(),
            });
        }
        if let Some(index) = buffer.first_non_finite() {
            return Err(ProcessingError::InvalidInput(format!(
                "non-finite sample at index {index}"
            )));
        }

        let mut work: Vec<Complex<f64>> = buffer
            .as_slice()
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .collect();
        self.fft.process(&mut work);

        let scale = 1.0 / self.size as f64;
        let bins = work
            .iter()
            .take(self.bin_count())
            .map(|c| c.norm() * scale)
            .collect();

        // norm() is non-negative and finite for finite input
        Ok(MagnitudeSpectrum::from_bins_lossy(bins))
    }
}

/// One-shot estimate for an arbitrary-length buffer.
///
/// Plans a fresh FFT every call; cycles should hold a `SpectralEstimator`.
pub fn estimate_magnitudes(buffer: &SampleBuffer) -> Result<MagnitudeSpectrum, ProcessingError> {
    if buffer.is_empty() {
        return Err(ProcessingError::InvalidInput("empty sample buffer".to_string()));
    }
    SpectralEstimator::new(buffer.len())?.estimate(buffer)
}
