//! Host-side peripherals: synthetic piezo signal, scripted trigger and
//! battery, fixed temperature probe, logging indicator.
//!
//! The transducer models a structure as a handful of lightly-excited
//! vibration modes plus Gaussian sensor noise. "Damage" lowers the modal
//! frequencies (stiffness loss) from a chosen read onwards, which is what
//! the divergence index is meant to pick up.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::{HashSet, VecDeque};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    AcquisitionError, Actuator, BatteryMonitor, CalibrationTriggerDetector, SignalAcquisition,
    TemperatureSource,
};
use crate::types::SampleBuffer;

// ============================================================================
// Synthetic Transducer
// ============================================================================

/// One vibration mode of the simulated structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructuralMode {
    pub frequency_hz: f64,
    pub amplitude: f64,
}

/// Modes of a generic steel beam, scaled into the audible range.
pub fn default_modes() -> Vec<StructuralMode> {
    vec![
        StructuralMode { frequency_hz: 120.0, amplitude: 1.0 },
        StructuralMode { frequency_hz: 755.0, amplitude: 0.45 },
        StructuralMode { frequency_hz: 2_110.0, amplitude: 0.2 },
        StructuralMode { frequency_hz: 4_140.0, amplitude: 0.08 },
    ]
}

/// Deterministic (when seeded) vibration source.
pub struct SyntheticTransducer {
    sample_rate_hz: f64,
    modes: Vec<StructuralMode>,
    noise: Normal<f64>,
    rng: StdRng,
    reads: u64,
    damage_after: Option<u64>,
    damage_factor: f64,
    dropouts: HashSet<u64>,
}

impl SyntheticTransducer {
    pub fn new(sample_rate_hz: f64, noise_std: f64, seed: Option<u64>) -> Result<Self, AcquisitionError> {
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "sample rate must be positive, got {sample_rate_hz}"
            )));
        }
        let noise = Normal::new(0.0, noise_std)
            .map_err(|e| AcquisitionError::InvalidConfig(format!("noise std {noise_std}: {e}")))?;
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            sample_rate_hz,
            modes: default_modes(),
            noise,
            rng,
            reads: 0,
            damage_after: None,
            damage_factor: 0.85,
            dropouts: HashSet::new(),
        })
    }

    pub fn with_modes(mut self, modes: Vec<StructuralMode>) -> Self {
        self.modes = modes;
        self
    }

    /// From read number `reads` (0-based) onwards, scale every modal
    /// frequency by `factor`.
    pub fn with_damage(mut self, reads: u64, factor: f64) -> Self {
        self.damage_after = Some(reads);
        self.damage_factor = factor;
        self
    }

    /// Reads (0-based) that fail with `SensorUnavailable`.
    pub fn with_dropouts(mut self, reads: impl IntoIterator<Item = u64>) -> Self {
        self.dropouts = reads.into_iter().collect();
        self
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn is_damaged(&self) -> bool {
        self.damage_after.is_some_and(|after| self.reads >= after)
    }

    fn synthesize(&mut self, n: usize) -> Vec<f64> {
        let shift = if self.is_damaged() { self.damage_factor } else { 1.0 };
        let phases: Vec<f64> = self.modes.iter().map(|_| self.rng.gen_range(0.0..2.0 * PI)).collect();
        (0..n)
            .map(|t| {
                let time = t as f64 / self.sample_rate_hz;
                let signal: f64 = self
                    .modes
                    .iter()
                    .zip(&phases)
                    .map(|(m, phase)| m.amplitude * (2.0 * PI * m.frequency_hz * shift * time + phase).sin())
                    .sum();
                signal + self.noise.sample(&mut self.rng)
            })
            .collect()
    }
}

#[async_trait]
impl SignalAcquisition for SyntheticTransducer {
    async fn acquire(&mut self, n: usize) -> Result<SampleBuffer, AcquisitionError> {
        let read = self.reads;
        self.reads += 1;
        if self.dropouts.contains(&read) {
            warn!(read, "[Transducer] Simulated dropout");
            return Err(AcquisitionError::SensorUnavailable(format!(
                "simulated dropout on read {read}"
            )));
        }
        if self.damage_after == Some(read) {
            info!(read, factor = self.damage_factor, "[Transducer] Damage injected: modal frequencies shifted");
        }
        tokio::task::yield_now().await;
        Ok(SampleBuffer::new(self.synthesize(n)))
    }

    fn source_name(&self) -> &str {
        "synthetic-piezo"
    }
}

// ============================================================================
// Calibration Trigger
// ============================================================================

/// Trigger detector that replays a fixed sequence of outcomes.
///
/// Once the script is exhausted every poll returns `fallback`.
#[derive(Debug, Clone)]
pub struct ScriptedTrigger {
    script: VecDeque<bool>,
    fallback: bool,
    polls: u64,
}

impl ScriptedTrigger {
    pub fn new(script: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            polls: 0,
        }
    }

    /// Fires on the first poll.
    pub fn always() -> Self {
        Self::new(std::iter::empty(), true)
    }

    pub fn never() -> Self {
        Self::new(std::iter::empty(), false)
    }

    /// Misses `misses` polls, then fires.
    pub fn after_misses(misses: usize) -> Self {
        Self::new(std::iter::repeat(false).take(misses), true)
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }
}

#[async_trait]
impl CalibrationTriggerDetector for ScriptedTrigger {
    async fn poll_trigger(&mut self, window: Duration) -> bool {
        self.polls += 1;
        let fired = self.script.pop_front().unwrap_or(self.fallback);
        debug!(window_ms = window.as_millis() as u64, fired, "[Trigger] Listen window closed");
        fired
    }
}

// ============================================================================
// Battery
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct FixedBattery(pub f64);

impl BatteryMonitor for FixedBattery {
    fn read_voltage(&mut self) -> f64 {
        self.0
    }
}

/// Replays voltages in order; the last one repeats.
#[derive(Debug, Clone)]
pub struct ScriptedBattery {
    readings: VecDeque<f64>,
    last: f64,
}

impl ScriptedBattery {
    pub fn new(readings: impl IntoIterator<Item = f64>, last: f64) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last,
        }
    }
}

impl BatteryMonitor for ScriptedBattery {
    fn read_voltage(&mut self) -> f64 {
        if let Some(v) = self.readings.pop_front() {
            self.last = v;
        }
        self.last
    }
}

// ============================================================================
// Temperature
// ============================================================================

/// Probe that always reports the same ambient temperature (°C).
#[derive(Debug, Clone, Copy)]
pub struct FixedTemperature(pub f64);

#[async_trait]
impl TemperatureSource for FixedTemperature {
    async fn read_celsius(&mut self) -> Result<f64, AcquisitionError> {
        Ok(self.0)
    }
}

// ============================================================================
// Indicator
// ============================================================================

/// LED stand-in that logs state changes.
#[derive(Debug, Default)]
pub struct LogIndicator {
    on: bool,
}

impl Actuator for LogIndicator {
    fn set_indicator(&mut self, on: bool) {
        if on != self.on {
            info!(on, "[Indicator] LED {}", if on { "ON" } else { "OFF" });
            self.on = on;
        }
    }
}

/// Records every indicator write; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    history: Arc<Mutex<Vec<bool>>>,
}

impl RecordingIndicator {
    pub fn history(&self) -> Vec<bool> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<bool> {
        self.history.lock().ok().and_then(|h| h.last().copied())
    }
}

impl Actuator for RecordingIndicator {
    fn set_indicator(&mut self, on: bool) {
        if let Ok(mut h) = self.history.lock() {
            h.push(on);
        }
    }
}
