//! Sensor node peripherals
//!
//! Narrow interfaces to the hardware around the fingerprint pipeline. Every
//! interface has a host implementation in [`simulated`] so the node runs
//! end-to-end without an ADC, tap sensor, temperature probe, battery gauge,
//! or LED.

pub mod simulated;

pub use simulated::{
    FixedBattery, FixedTemperature, LogIndicator, RecordingIndicator, ScriptedBattery,
    ScriptedTrigger, StructuralMode, SyntheticTransducer,
};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::defaults::{REFERENCE_TEMPERATURE_C, TEMPERATURE_COEFFICIENT_PER_C};
use crate::types::SampleBuffer;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Invalid sensor configuration: {0}")]
    InvalidConfig(String),
}

/// Source of vibration samples (the ADC behind the piezo transducer).
#[async_trait]
pub trait SignalAcquisition: Send {
    /// Capture exactly `n` consecutive samples at the profile's sampling rate.
    async fn acquire(&mut self, n: usize) -> Result<SampleBuffer, AcquisitionError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

/// Detector for the operator's calibration tap pattern.
#[async_trait]
pub trait CalibrationTriggerDetector: Send {
    /// Listen for up to `window`; `true` if the pattern was recognized.
    async fn poll_trigger(&mut self, window: Duration) -> bool;
}

/// Ambient temperature probe mounted next to the transducer (DS18B20).
#[async_trait]
pub trait TemperatureSource: Send {
    async fn read_celsius(&mut self) -> Result<f64, AcquisitionError>;
}

/// Transducer gain correction at `temperature_c`: `1 + (T − 25) × 0.001`.
pub fn compensation_factor(temperature_c: f64) -> f64 {
    1.0 + (temperature_c - REFERENCE_TEMPERATURE_C) * TEMPERATURE_COEFFICIENT_PER_C
}

pub trait BatteryMonitor: Send {
    /// Supply voltage in volts.
    fn read_voltage(&mut self) -> f64;
}

/// Status LED. Best effort: failures are the implementation's problem.
pub trait Actuator: Send {
    fn set_indicator(&mut self, on: bool);
}
