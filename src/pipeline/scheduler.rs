//! Time source and inter-cycle sleep policy

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::config::DutyCycleConfig;
use crate::types::HardwareTier;

/// Clock and sleep, injectable so loops can run on virtual time.
#[async_trait]
pub trait Scheduler: Send {
    async fn sleep(&mut self, duration: Duration);
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Virtual clock: sleeping advances time instantly and is recorded.
/// Clones share the record.
#[derive(Debug, Clone)]
pub struct SimulatedScheduler {
    now: DateTime<Utc>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl SimulatedScheduler {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for SimulatedScheduler {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

#[async_trait]
impl Scheduler for SimulatedScheduler {
    async fn sleep(&mut self, duration: Duration) {
        if let Ok(mut s) = self.sleeps.lock() {
            s.push(duration);
        }
        self.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        tokio::task::yield_now().await;
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

// ============================================================================
// Duty Cycle
// ============================================================================

/// Sleep between monitoring cycles, stretched when the battery is low.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycle {
    pub normal: Duration,
    pub low_battery: Duration,
    pub low_battery_voltage: f64,
}

impl DutyCycle {
    pub fn from_config(config: &DutyCycleConfig, tier: HardwareTier) -> Self {
        Self {
            normal: config.interval_for(tier),
            low_battery: Duration::from_secs(config.low_battery_interval_secs),
            low_battery_voltage: config.low_battery_voltage,
        }
    }

    /// Interval for a battery reading. An unreadable (NaN) battery counts as low.
    pub fn interval_for(&self, voltage: f64) -> Duration {
        if voltage.is_nan() || voltage < self.low_battery_voltage {
            debug!(voltage, "[DutyCycle] Low battery, stretching interval");
            self.low_battery
        } else {
            self.normal
        }
    }
}
