//! SDI → alert level

use crate::types::{AlertState, DeviceProfile};

/// `Alert` iff `sdi > threshold`. A tie is `Normal`; NaN is `Alert`.
pub fn evaluate_threshold(sdi: f64, threshold: f64) -> AlertState {
    if sdi.is_nan() || sdi > threshold {
        AlertState::Alert
    } else {
        AlertState::Normal
    }
}

pub fn evaluate(sdi: f64, profile: &DeviceProfile) -> AlertState {
    evaluate_threshold(sdi, profile.alert_threshold)
}
