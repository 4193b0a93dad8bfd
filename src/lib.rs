//! SIF: Structural Integrity Fingerprint sensor node
//!
//! Samples vibration from a piezo transducer, reduces each window to a
//! spectral fingerprint, and scores it against a baseline captured at
//! calibration. A Structural Divergence Index (SDI) above threshold raises
//! an alert.
//!
//! ## Architecture
//!
//! - **processing**: FFT magnitude estimation, SASF²/DASF² transform, SDI, alerting
//! - **baseline**: calibration state machine and fingerprint persistence
//! - **coprocessor**: fixed-frame offload of the transform over a byte stream
//! - **pipeline**: per-cycle orchestration and the duty-cycled node loop
//! - **acquisition** / **telemetry**: peripheral interfaces with host implementations

pub mod acquisition;
pub mod baseline;
pub mod config;
pub mod coprocessor;
pub mod pipeline;
pub mod processing;
pub mod telemetry;
pub mod types;

// Re-export node configuration
pub use config::NodeConfig;

// Re-export commonly used types
pub use types::{
    AlertState, CalibrationState, DeviceProfile, HardwareTier, MagnitudeSpectrum, SampleBuffer,
    ScoringMode, Spectrum, TransformedSpectrum,
};

// Re-export core components
pub use baseline::{BaselineFingerprint, CalibrationController, CalibrationError};
pub use coprocessor::{CoprocessorLink, CoprocessorService, LinkError};
pub use pipeline::{CycleOutcome, MonitorCycle, NodeLoop, NodeStats};
pub use processing::{ProcessingError, SpectralEstimator, SpectralTransform};
