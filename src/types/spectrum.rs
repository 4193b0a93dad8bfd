//! Sample buffers and spectra flowing through the fingerprint pipeline

use serde::{Deserialize, Serialize};

// ============================================================================
// Sample Buffer
// ============================================================================

/// Time-ordered vibration samples from one acquisition window.
///
/// Construction never fails; the estimator is responsible for rejecting
/// empty or non-finite buffers so that a bad acquisition surfaces as
/// `ProcessingError::InvalidInput` rather than a panic at the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBuffer {
    samples: Vec<f64>,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples }
    }

    /// Buffer of `n` zero samples (a silent transducer).
    pub fn silent(n: usize) -> Self {
        Self {
            samples: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }

    /// Index of the first NaN/Inf sample, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.samples.iter().position(|s| !s.is_finite())
    }

    /// Every sample multiplied by `factor`.
    pub fn scaled(mut self, factor: f64) -> Self {
        for s in &mut self.samples {
            *s *= factor;
        }
        self
    }

    /// Root-mean-square amplitude, used for logging only.
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self.samples.iter().map(|s| s * s).sum();
        (sum_squares / self.samples.len() as f64).sqrt()
    }
}

impl From<Vec<f64>> for SampleBuffer {
    fn from(samples: Vec<f64>) -> Self {
        Self::new(samples)
    }
}

/// Number of one-sided spectrum bins for a buffer of `n` samples: ⌊n/2⌋ + 1.
pub const fn bin_count(n: usize) -> usize {
    n / 2 + 1
}

// ============================================================================
// Magnitude Spectrum
// ============================================================================

/// One-sided DFT magnitude spectrum. Every bin is finite and non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct MagnitudeSpectrum {
    bins: Vec<f64>,
}

impl MagnitudeSpectrum {
    /// Wrap raw magnitudes, rejecting negative or non-finite bins.
    pub fn from_bins(bins: Vec<f64>) -> Result<Self, SpectrumError> {
        if let Some(index) = bins.iter().position(|m| !m.is_finite() || *m < 0.0) {
            return Err(SpectrumError::InvalidMagnitude {
                index,
                value: bins[index],
            });
        }
        Ok(Self { bins })
    }

    /// Wrap magnitudes received from an untrusted peer, clamping negative
    /// and non-finite bins to zero instead of rejecting the frame.
    pub fn from_bins_lossy(bins: Vec<f64>) -> Self {
        let bins = bins
            .into_iter()
            .map(|m| if m.is_finite() && m > 0.0 { m } else { 0.0 })
            .collect();
        Self { bins }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            bins: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn bins(&self) -> &[f64] {
        &self.bins
    }

    /// Index and value of the strongest bin, skipping DC.
    pub fn peak_bin(&self) -> Option<(usize, f64)> {
        self.bins
            .iter()
            .copied()
            .enumerate()
            .skip(1)
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
    }
}

impl TryFrom<Vec<f64>> for MagnitudeSpectrum {
    type Error = SpectrumError;

    fn try_from(bins: Vec<f64>) -> Result<Self, Self::Error> {
        Self::from_bins(bins)
    }
}

impl From<MagnitudeSpectrum> for Vec<f64> {
    fn from(spectrum: MagnitudeSpectrum) -> Self {
        spectrum.bins
    }
}

// ============================================================================
// Transformed Spectrum
// ============================================================================

/// Output of the SASF²/DASF² transform. Signed, and never NaN or infinite:
/// non-finite values are replaced by 0 on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct TransformedSpectrum {
    values: Vec<f64>,
}

impl TransformedSpectrum {
    pub fn from_values(values: Vec<f64>) -> Self {
        let values = values
            .into_iter()
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl From<Vec<f64>> for TransformedSpectrum {
    fn from(values: Vec<f64>) -> Self {
        Self::from_values(values)
    }
}

impl From<TransformedSpectrum> for Vec<f64> {
    fn from(spectrum: TransformedSpectrum) -> Self {
        spectrum.values
    }
}

// ============================================================================
// Fingerprint Spectrum
// ============================================================================

/// Which kind of spectrum a fingerprint or a cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumKind {
    Magnitude,
    Transformed,
}

impl std::fmt::Display for SpectrumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectrumKind::Magnitude => write!(f, "magnitude"),
            SpectrumKind::Transformed => write!(f, "SASF²"),
        }
    }
}

/// A spectrum that can be compared by the divergence scorer.
///
/// The basic scorer works on magnitudes, the SASF² scorer on transformed
/// values; the two are never compared against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Spectrum {
    Magnitude(MagnitudeSpectrum),
    Transformed(TransformedSpectrum),
}

impl Spectrum {
    pub fn kind(&self) -> SpectrumKind {
        match self {
            Spectrum::Magnitude(_) => SpectrumKind::Magnitude,
            Spectrum::Transformed(_) => SpectrumKind::Transformed,
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    pub fn values(&self) -> &[f64] {
        match self {
            Spectrum::Magnitude(m) => m.bins(),
            Spectrum::Transformed(t) => t.values(),
        }
    }
}

impl From<MagnitudeSpectrum> for Spectrum {
    fn from(spectrum: MagnitudeSpectrum) -> Self {
        Spectrum::Magnitude(spectrum)
    }
}

impl From<TransformedSpectrum> for Spectrum {
    fn from(spectrum: TransformedSpectrum) -> Self {
        Spectrum::Transformed(spectrum)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpectrumError {
    #[error("Invalid magnitude at bin {index}: {value} (must be finite and >= 0)")]
    InvalidMagnitude { index: usize, value: f64 },
}
