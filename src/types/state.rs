//! Node state enums: calibration progress and alert level

use serde::{Deserialize, Serialize};

/// Progress of baseline capture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum CalibrationState {
    /// No baseline; waiting for the calibration trigger.
    #[default]
    Uncalibrated,
    /// Trigger observed; the baseline sample is being processed.
    Calibrating,
    /// Baseline fingerprint held; cycles monitor against it.
    Calibrated,
}

impl std::fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationState::Uncalibrated => write!(f, "Uncalibrated"),
            CalibrationState::Calibrating => write!(f, "Calibrating"),
            CalibrationState::Calibrated => write!(f, "Calibrated"),
        }
    }
}

/// Result of comparing an SDI against the alert threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum AlertState {
    #[default]
    Normal,
    Alert,
}

impl AlertState {
    pub fn is_alert(self) -> bool {
        self == AlertState::Alert
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Normal => write!(f, "NORMAL"),
            AlertState::Alert => write!(f, "ALERT"),
        }
    }
}
