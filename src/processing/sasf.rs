//! SASF² log-log spectral transform with the optional DASF² stage
//!
//! For each bin i of a magnitude spectrum:
//!
//! ```text
//! ratio[i]     = ln(mag[i] + ε) / ln(i + 2 + ε)
//! coherence[i] = exp(-|ratio[i]| / coherence_threshold)
//! out[i]       = ratio[i] × coherence[i]
//! ```
//!
//! DASF², when enabled, attenuates the ratio of every bin whose log-magnitude
//! sits more than the dissipation threshold away from the spectrum's mean
//! log-magnitude. It runs before coherence weighting.

use crate::types::{Dasf2Settings, DeviceProfile, MagnitudeSpectrum, TransformedSpectrum};

/// Coherence weight for a log-log ratio.
///
/// Always in (0, 1]: underflow is clamped to the smallest positive f64.
pub fn coherence_factor(ratio: f64, coherence_threshold: f64) -> f64 {
    let c = (-ratio.abs() / coherence_threshold).exp();
    if c.is_nan() {
        f64::MIN_POSITIVE
    } else {
        c.clamp(f64::MIN_POSITIVE, 1.0)
    }
}

/// Log-log ratio of one bin; 0 when the quotient is not finite.
fn log_ratio(magnitude: f64, index: usize, epsilon: f64) -> f64 {
    let log_mag = (magnitude + epsilon).ln();
    let log_freq = (index as f64 + 2.0 + epsilon).ln();
    let ratio = log_mag / log_freq;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

/// Stateless transform configured from a device profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralTransform {
    epsilon: f64,
    coherence_threshold: f64,
    dasf2: Dasf2Settings,
}

impl SpectralTransform {
    pub fn new(epsilon: f64, coherence_threshold: f64, dasf2: Dasf2Settings) -> Self {
        Self {
            epsilon,
            coherence_threshold,
            dasf2,
        }
    }

    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self::new(profile.epsilon, profile.coherence_threshold, profile.dasf2)
    }

    pub fn dasf2(&self) -> &Dasf2Settings {
        &self.dasf2
    }

    /// Apply DASF² (if enabled) and SASF² weighting.
    ///
    /// Output has the input's length and contains no NaN or infinity.
    pub fn transform(&self, spectrum: &MagnitudeSpectrum) -> TransformedSpectrum {
        let mut ratios: Vec<f64> = spectrum
            .bins()
            .iter()
            .enumerate()
            .map(|(i, &m)| log_ratio(m, i, self.epsilon))
            .collect();

        if self.dasf2.enabled {
            self.dissipate(spectrum, &mut ratios);
        }

        let values = ratios
            .into_iter()
            .map(|r| r * coherence_factor(r, self.coherence_threshold))
            .collect();
        TransformedSpectrum::from_values(values)
    }

    /// Attenuate ratios of bins far from the mean log-magnitude.
    fn dissipate(&self, spectrum: &MagnitudeSpectrum, ratios: &mut [f64]) {
        let bins = spectrum.bins();
        if bins.is_empty() {
            return;
        }
        let log_mags: Vec<f64> = bins.iter().map(|&m| (m + self.epsilon).ln()).collect();
        let mean = log_mags.iter().sum::<f64>() / log_mags.len() as f64;
        if !mean.is_finite() {
            return;
        }

        for (ratio, log_mag) in ratios.iter_mut().zip(&log_mags) {
            if (log_mag - mean).abs() > self.dasf2.dissipation_threshold {
                *ratio *= self.dasf2.attenuation;
            }
        }
    }
}

impl Default for SpectralTransform {
    fn default() -> Self {
        Self::from_profile(&DeviceProfile::default())
    }
}
