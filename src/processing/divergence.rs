//! Structural Divergence Index (SDI)
//!
//! Distance between the baseline fingerprint and the current one. Two
//! metrics, matching the two fingerprint kinds:
//!
//! - **basic** on magnitude spectra: mean |ln(b+ε) − ln(c+ε)|
//! - **SASF²** on transformed spectra: mean |b − c|
//!
//! Any comparison that cannot be made (empty, length mismatch, mixed kinds)
//! scores `f64::INFINITY`, which the alert evaluator treats as an alert.

use tracing::warn;

use crate::types::{MagnitudeSpectrum, Spectrum, TransformedSpectrum};

/// Mean absolute log-magnitude difference.
pub fn score_basic(baseline: &MagnitudeSpectrum, current: &MagnitudeSpectrum, epsilon: f64) -> f64 {
    mean_abs_diff(baseline.bins(), current.bins(), |v| (v + epsilon).ln())
}

/// Mean absolute difference of SASF²-transformed values.
pub fn score_sasf2(baseline: &TransformedSpectrum, current: &TransformedSpectrum) -> f64 {
    mean_abs_diff(baseline.values(), current.values(), |v| v)
}

/// Score two fingerprints with the metric their kind calls for.
pub fn score(baseline: &Spectrum, current: &Spectrum, epsilon: f64) -> f64 {
    match (baseline, current) {
        (Spectrum::Magnitude(b), Spectrum::Magnitude(c)) => score_basic(b, c, epsilon),
        (Spectrum::Transformed(b), Spectrum::Transformed(c)) => score_sasf2(b, c),
        _ => {
            warn!(
                baseline = %baseline.kind(),
                current = %current.kind(),
                "[SDI] Fingerprint kinds differ, refusing to compare"
            );
            f64::INFINITY
        }
    }
}

fn mean_abs_diff(a: &[f64], b: &[f64], map: impl Fn(f64) -> f64) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::INFINITY;
    }
    let total: f64 = a.iter().zip(b).map(|(&x, &y)| (map(x) - map(y)).abs()).sum();
    total / a.len() as f64
}
