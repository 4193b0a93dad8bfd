//! Calibration state machine owning the baseline fingerprint

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{check_shape, load_fingerprint, save_fingerprint, BaselineFingerprint, CalibrationError, RetryBackoff};
use crate::types::{CalibrationState, DeviceProfile, Spectrum};

/// What the cycle should do after the trigger detector has been polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    /// Trigger seen: acquire the baseline sample now.
    Capture,
    /// No trigger: listen again after this delay.
    Listen { retry_in: Duration },
    /// A fingerprint is already held; nothing to do.
    AlreadyCalibrated,
}

/// Sole owner and writer of the baseline fingerprint.
///
/// `fingerprint()` is `Some` exactly when the state is `Calibrated`.
#[derive(Debug)]
pub struct CalibrationController {
    state: CalibrationState,
    fingerprint: Option<BaselineFingerprint>,
    backoff: RetryBackoff,
    persist_path: Option<PathBuf>,
}

impl CalibrationController {
    pub fn new(backoff: RetryBackoff) -> Self {
        Self {
            state: CalibrationState::Uncalibrated,
            fingerprint: None,
            backoff,
            persist_path: None,
        }
    }

    /// Persist every captured fingerprint to `path`.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn fingerprint(&self) -> Option<&BaselineFingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CalibrationState::Calibrated
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Base delay before retrying a failed capture.
    pub fn retry_delay(&self) -> Duration {
        self.backoff.base()
    }

    /// Resume from the persisted fingerprint, if one exists and fits `profile`.
    ///
    /// Returns `true` when the controller is now `Calibrated`.
    pub fn restore(&mut self, profile: &DeviceProfile) -> bool {
        if self.is_calibrated() {
            return true;
        }
        let Some(path) = self.persist_path.as_deref() else {
            return false;
        };
        let Some(fingerprint) = load_fingerprint(path) else {
            return false;
        };
        if let Err(e) = fingerprint.check_compatible(profile) {
            warn!(path = %path.display(), error = %e, "[Calibration] Persisted fingerprint does not fit the active profile, ignoring");
            return false;
        }
        info!(
            captured_at = %fingerprint.captured_at,
            bins = fingerprint.len(),
            "[Calibration] Resumed from persisted fingerprint"
        );
        self.fingerprint = Some(fingerprint);
        self.state = CalibrationState::Calibrated;
        self.backoff.reset();
        true
    }

    /// Feed the result of one trigger listen window.
    pub fn observe_trigger(&mut self, triggered: bool) -> CalibrationStep {
        match self.state {
            CalibrationState::Calibrated => CalibrationStep::AlreadyCalibrated,
            CalibrationState::Calibrating => CalibrationStep::Capture,
            CalibrationState::Uncalibrated if triggered => {
                info!("[Calibration] Trigger detected, capturing baseline");
                self.state = CalibrationState::Calibrating;
                CalibrationStep::Capture
            }
            CalibrationState::Uncalibrated => {
                let retry_in = self.backoff.next_delay();
                debug!(
                    misses = self.backoff.misses(),
                    retry_in_secs = retry_in.as_secs(),
                    "[Calibration] No trigger in listen window"
                );
                CalibrationStep::Listen { retry_in }
            }
        }
    }

    /// Store the captured spectrum as the baseline.
    ///
    /// A spectrum that does not fit `profile` aborts the attempt and leaves
    /// the controller `Uncalibrated`. A failed save is logged; the in-memory
    /// fingerprint is still used.
    pub fn complete(
        &mut self,
        spectrum: Spectrum,
        profile: &DeviceProfile,
        now: DateTime<Utc>,
    ) -> Result<&BaselineFingerprint, CalibrationError> {
        if self.state != CalibrationState::Calibrating {
            return Err(CalibrationError::NotCalibrating(self.state));
        }
        if let Err(e) = check_shape(&spectrum, profile) {
            self.abort(&e.to_string());
            return Err(e);
        }

        let fingerprint = BaselineFingerprint::new(spectrum, profile, now);
        if let Some(path) = self.persist_path.as_deref() {
            if let Err(e) = save_fingerprint(path, &fingerprint) {
                warn!(path = %path.display(), error = %e, "[Calibration] Failed to persist fingerprint");
            }
        }
        info!(
            bins = fingerprint.len(),
            kind = %fingerprint.kind(),
            "[Calibration] Baseline fingerprint captured"
        );

        self.state = CalibrationState::Calibrated;
        self.backoff.reset();
        Ok(self.fingerprint.insert(fingerprint))
    }

    /// Abandon an in-progress capture. No fingerprint is kept.
    pub fn abort(&mut self, reason: &str) {
        if self.state == CalibrationState::Calibrating {
            warn!(reason, "[Calibration] Capture failed, back to uncalibrated");
            self.state = CalibrationState::Uncalibrated;
        }
    }

    /// Drop the fingerprint and start over, including any persisted copy.
    pub fn force_recalibrate(&mut self) {
        info!(previous = %self.state, "[Calibration] Forced recalibration");
        self.state = CalibrationState::Uncalibrated;
        self.fingerprint = None;
        self.backoff.reset();
        if let Some(path) = self.persist_path.as_deref() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed persisted fingerprint"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove persisted fingerprint"),
            }
        }
    }
}
