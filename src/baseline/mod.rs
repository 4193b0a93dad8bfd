//! Baseline Fingerprint - calibration state and persistence
//!
//! A node is useless until it holds a baseline fingerprint: the spectrum of
//! the structure in its known-healthy state. Every later cycle is scored
//! against it.
//!
//! ## Lifecycle
//!
//! ```text
//! Uncalibrated ──trigger──▶ Calibrating ──capture ok──▶ Calibrated
//!      ▲  │                      │                          │
//!      │  └─no trigger (backoff) │ failure                  │ force_recalibrate
//!      └─────────────────────────┴──────────────────────────┘
//! ```
//!
//! ## Persistence
//!
//! The fingerprint is written as versioned JSON so a node that loses power
//! resumes monitoring against the same baseline. Missing, corrupt, or
//! mismatched files are ignored and the node starts uncalibrated.
//!
//! A fingerprint carries the profile parameters it was computed under. One
//! captured at a different rate, window, ε, coherence threshold, DASF²
//! setting, scoring mode or compensation setting is never scored against.

mod backoff;
mod controller;

pub use backoff::RetryBackoff;
pub use controller::{CalibrationController, CalibrationStep};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Dasf2Settings, DeviceProfile, HardwareTier, ScoringMode, Spectrum, SpectrumKind};

/// Bump when the on-disk layout of `FingerprintState` changes.
pub const SCHEMA_VERSION: u32 = 2;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration not in progress (state: {0})")]
    NotCalibrating(crate::types::CalibrationState),

    #[error("Fingerprint length mismatch: profile expects {expected} bins, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Fingerprint kind mismatch: profile expects {expected} spectrum, got {actual}")]
    KindMismatch {
        expected: SpectrumKind,
        actual: SpectrumKind,
    },

    #[error("Fingerprint was captured under a different {0}")]
    ProfileMismatch(&'static str),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

// ============================================================================
// Profile Reference
// ============================================================================

/// Profile parameters a fingerprint was computed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReference {
    /// Recorded for operators; medium and high tiers share a spectrum layout.
    pub tier: HardwareTier,
    pub sample_rate_hz: f64,
    pub duration_sec: f64,
    pub epsilon: f64,
    pub scoring: ScoringMode,
    pub coherence_threshold: f64,
    pub dasf2: Dasf2Settings,
    pub temperature_compensation: bool,
}

/// Equal up to JSON float round-off.
fn same(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
}

impl ProfileReference {
    pub fn of(profile: &DeviceProfile) -> Self {
        Self {
            tier: profile.tier,
            sample_rate_hz: profile.sample_rate_hz,
            duration_sec: profile.duration_sec,
            epsilon: profile.epsilon,
            scoring: profile.scoring,
            coherence_threshold: profile.coherence_threshold,
            dasf2: profile.dasf2,
            temperature_compensation: profile.temperature_compensation,
        }
    }

    /// First parameter that changes the meaning of a fingerprint value
    /// between this reference and `profile`.
    ///
    /// Transform parameters only count when the fingerprint is transformed,
    /// and DASF² constants only when the stage is enabled.
    pub fn mismatch(&self, profile: &DeviceProfile) -> Option<&'static str> {
        let other = Self::of(profile);
        if !same(self.sample_rate_hz, other.sample_rate_hz) {
            return Some("sample_rate_hz");
        }
        if !same(self.duration_sec, other.duration_sec) {
            return Some("duration_sec");
        }
        if !same(self.epsilon, other.epsilon) {
            return Some("epsilon");
        }
        if self.scoring != other.scoring {
            return Some("scoring");
        }
        if self.temperature_compensation != other.temperature_compensation {
            return Some("temperature_compensation");
        }
        if self.scoring == ScoringMode::Basic {
            return None;
        }
        if !same(self.coherence_threshold, other.coherence_threshold) {
            return Some("coherence_threshold");
        }
        if self.dasf2.enabled != other.dasf2.enabled {
            return Some("dasf2.enabled");
        }
        if self.dasf2.enabled {
            if !same(self.dasf2.dissipation_threshold, other.dasf2.dissipation_threshold) {
                return Some("dasf2.dissipation_threshold");
            }
            if !same(self.dasf2.attenuation, other.dasf2.attenuation) {
                return Some("dasf2.attenuation");
            }
        }
        None
    }
}

// ============================================================================
// Baseline Fingerprint
// ============================================================================

/// Spectrum captured at calibration, with the context needed to trust it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineFingerprint {
    pub spectrum: Spectrum,
    pub captured_at: DateTime<Utc>,
    pub profile: ProfileReference,
}

impl BaselineFingerprint {
    pub fn new(spectrum: Spectrum, profile: &DeviceProfile, captured_at: DateTime<Utc>) -> Self {
        Self {
            spectrum,
            captured_at,
            profile: ProfileReference::of(profile),
        }
    }

    pub fn kind(&self) -> SpectrumKind {
        self.spectrum.kind()
    }

    pub fn len(&self) -> usize {
        self.spectrum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectrum.is_empty()
    }

    /// Check that this fingerprint can be scored against cycles of `profile`.
    pub fn check_compatible(&self, profile: &DeviceProfile) -> Result<(), CalibrationError> {
        check_shape(&self.spectrum, profile)?;
        match self.profile.mismatch(profile) {
            Some(field) => Err(CalibrationError::ProfileMismatch(field)),
            None => Ok(()),
        }
    }
}

/// Spectrum kind a profile fingerprints with.
pub fn expected_kind(profile: &DeviceProfile) -> SpectrumKind {
    if profile.uses_transform() {
        SpectrumKind::Transformed
    } else {
        SpectrumKind::Magnitude
    }
}

fn check_shape(spectrum: &Spectrum, profile: &DeviceProfile) -> Result<(), CalibrationError> {
    let expected = profile.bin_count();
    if spectrum.len() != expected {
        return Err(CalibrationError::LengthMismatch {
            expected,
            actual: spectrum.len(),
        });
    }
    let kind = expected_kind(profile);
    if spectrum.kind() != kind {
        return Err(CalibrationError::KindMismatch {
            expected: kind,
            actual: spectrum.kind(),
        });
    }
    Ok(())
}

// ============================================================================
// Persistence
// ============================================================================

/// Serializable on-disk wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintState {
    pub schema_version: u32,
    pub fingerprint: BaselineFingerprint,
}

/// Write a fingerprint as pretty JSON, creating parent directories.
pub fn save_fingerprint(path: &Path, fingerprint: &BaselineFingerprint) -> Result<(), CalibrationError> {
    let state = FingerprintState {
        schema_version: SCHEMA_VERSION,
        fingerprint: fingerprint.clone(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&state)?;
    std::fs::write(path, json)?;
    info!(
        path = %path.display(),
        bins = fingerprint.len(),
        kind = %fingerprint.kind(),
        "Baseline fingerprint saved"
    );
    Ok(())
}

/// Read a fingerprint back.
///
/// Returns `None` when the file is missing, corrupt, or written under a
/// different schema version.
pub fn load_fingerprint(path: &Path) -> Option<BaselineFingerprint> {
    let json = match std::fs::read_to_string(path) {
        Ok(j) => j,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No baseline fingerprint file found");
            return None;
        }
    };
    let state: FingerprintState = match serde_json::from_str(&json) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt baseline fingerprint file, ignoring");
            return None;
        }
    };
    if state.schema_version != SCHEMA_VERSION {
        warn!(
            file_version = state.schema_version,
            expected = SCHEMA_VERSION,
            "Schema version mismatch, ignoring saved baseline fingerprint"
        );
        return None;
    }
    info!(
        path = %path.display(),
        bins = state.fingerprint.len(),
        captured_at = %state.fingerprint.captured_at,
        "Baseline fingerprint loaded"
    );
    Some(state.fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MagnitudeSpectrum, TransformedSpectrum};

    fn low_tier_fingerprint() -> BaselineFingerprint {
        let profile = DeviceProfile::for_tier(HardwareTier::Low);
        BaselineFingerprint::new(
            MagnitudeSpectrum::zeros(profile.bin_count()).into(),
            &profile,
            Utc::now(),
        )
    }

    fn medium_tier_fingerprint() -> (DeviceProfile, BaselineFingerprint) {
        let profile = DeviceProfile::for_tier(HardwareTier::Medium);
        let fp = BaselineFingerprint::new(
            TransformedSpectrum::from_values(vec![-0.05; profile.bin_count()]).into(),
            &profile,
            Utc::now(),
        );
        (profile, fp)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("fingerprint.json");
        let fp = low_tier_fingerprint();
        save_fingerprint(&path, &fp).expect("save");
        let loaded = load_fingerprint(&path).expect("load");
        assert_eq!(loaded, fp);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_fingerprint(&dir.path().join("absent.json")).is_none());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fingerprint.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(load_fingerprint(&path).is_none());
    }

    #[test]
    fn test_load_rejects_schema_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fingerprint.json");
        let state = FingerprintState {
            schema_version: SCHEMA_VERSION + 1,
            fingerprint: low_tier_fingerprint(),
        };
        std::fs::write(&path, serde_json::to_string(&state).expect("json")).expect("write");
        assert!(load_fingerprint(&path).is_none());
    }

    #[test]
    fn test_compatibility_checks() {
        let fp = low_tier_fingerprint();
        assert!(fp.check_compatible(&DeviceProfile::for_tier(HardwareTier::Low)).is_ok());
        assert!(matches!(
            fp.check_compatible(&DeviceProfile::for_tier(HardwareTier::Medium)),
            Err(CalibrationError::LengthMismatch { expected: 4001, actual: 2001 })
        ));

        let mut medium = DeviceProfile::for_tier(HardwareTier::Medium);
        medium.sample_rate_hz = 40_000.0;
        assert!(matches!(
            fp.check_compatible(&medium),
            Err(CalibrationError::KindMismatch { .. })
        ));

        // Right shape, but computed under a different transform
        let transformed = BaselineFingerprint {
            spectrum: TransformedSpectrum::from_values(vec![0.0; 2001]).into(),
            ..fp
        };
        assert!(matches!(
            transformed.check_compatible(&medium),
            Err(CalibrationError::ProfileMismatch("sample_rate_hz"))
        ));
    }

    #[test]
    fn test_spectrum_shaping_parameters_must_match() {
        let (profile, fp) = medium_tier_fingerprint();
        assert!(fp.check_compatible(&profile).is_ok());

        let mut rate_and_window = profile.clone();
        rate_and_window.sample_rate_hz = 40_000.0;
        rate_and_window.duration_sec = 0.2;
        assert_eq!(rate_and_window.bin_count(), profile.bin_count());
        assert_eq!(fp.profile.mismatch(&rate_and_window), Some("sample_rate_hz"));

        let mut coherence = profile.clone();
        coherence.coherence_threshold = 0.05;
        assert_eq!(fp.profile.mismatch(&coherence), Some("coherence_threshold"));

        let mut dasf2 = profile.clone();
        dasf2.dasf2.enabled = true;
        assert_eq!(fp.profile.mismatch(&dasf2), Some("dasf2.enabled"));

        let mut epsilon = profile.clone();
        epsilon.epsilon = 1e-6;
        assert_eq!(fp.profile.mismatch(&epsilon), Some("epsilon"));

        let mut uncompensated = profile.clone();
        uncompensated.temperature_compensation = false;
        assert_eq!(fp.profile.mismatch(&uncompensated), Some("temperature_compensation"));
    }

    #[test]
    fn test_non_shaping_parameters_are_ignored() {
        let (profile, fp) = medium_tier_fingerprint();
        let mut tuned = profile.clone();
        tuned.alert_threshold = 1e-3;
        tuned.offload = true;
        tuned.tier = HardwareTier::High;
        // DASF² constants do not matter while the stage is off
        tuned.dasf2.attenuation = 0.5;
        assert!(fp.check_compatible(&tuned).is_ok());

        // Transform parameters do not matter for magnitude fingerprints
        let low = low_tier_fingerprint();
        let mut basic = DeviceProfile::for_tier(HardwareTier::Low);
        basic.coherence_threshold = 0.05;
        basic.dasf2.enabled = true;
        assert!(low.check_compatible(&basic).is_ok());
    }

    #[test]
    fn test_reference_survives_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fingerprint.json");
        let (mut profile, _) = medium_tier_fingerprint();
        profile.coherence_threshold = 0.3;
        profile.dasf2.enabled = true;
        profile.dasf2.attenuation = 0.15;
        let fp = BaselineFingerprint::new(
            TransformedSpectrum::from_values(vec![0.0; profile.bin_count()]).into(),
            &profile,
            Utc::now(),
        );
        save_fingerprint(&path, &fp).expect("save");
        let loaded = load_fingerprint(&path).expect("load");
        assert!(loaded.check_compatible(&profile).is_ok());
    }
}
