//! Shared data structures for the structural fingerprint pipeline
//!
//! - `SampleBuffer`: one acquisition window of transducer samples
//! - `MagnitudeSpectrum` / `TransformedSpectrum`: estimator and transform outputs
//! - `DeviceProfile`: per-tier sampling and scoring parameters
//! - `CalibrationState` / `AlertState`: node state

mod profile;
mod spectrum;
mod state;

pub use profile::*;
pub use spectrum::*;
pub use state::*;
