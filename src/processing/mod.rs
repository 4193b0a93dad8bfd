//! Signal processing - spectrum estimation, SASF² transform, SDI scoring

mod alert;
mod divergence;
mod fft;
mod sasf;

pub use alert::{evaluate, evaluate_threshold};
pub use divergence::{score, score_basic, score_sasf2};
pub use fft::{estimate_magnitudes, SpectralEstimator};
pub use sasf::{coherence_factor, SpectralTransform};

use thiserror::Error;

/// Errors in signal processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Buffer length mismatch: estimator planned for {expected} samples, got {actual}")]
    BufferLength { expected: usize, actual: usize },
}
