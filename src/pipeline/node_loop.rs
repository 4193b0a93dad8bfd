//! Runs monitor cycles back to back until shutdown.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::cycle::{CycleOutcome, MonitorCycle};
use super::scheduler::{DutyCycle, Scheduler};
use crate::acquisition::BatteryMonitor;

/// Counters over the lifetime of a node loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub cycles: u64,
    pub calibrations: u64,
    pub calibration_misses: u64,
    pub calibration_failures: u64,
    pub monitored: u64,
    pub alerts: u64,
    pub incomplete: u64,
}

impl NodeStats {
    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Calibrated => self.calibrations += 1,
            CycleOutcome::CalibrationPending { .. } => self.calibration_misses += 1,
            CycleOutcome::CalibrationFailed { .. } => self.calibration_failures += 1,
            CycleOutcome::Monitored(report) => {
                self.monitored += 1;
                if report.alert_state.is_alert() {
                    self.alerts += 1;
                }
            }
            CycleOutcome::Incomplete(_) => self.incomplete += 1,
        }
    }
}

/// Owns the cycle and everything that decides when the next one runs.
pub struct NodeLoop {
    cycle: MonitorCycle,
    scheduler: Box<dyn Scheduler>,
    battery: Box<dyn BatteryMonitor>,
    duty: DutyCycle,
    cancel_token: CancellationToken,
    max_cycles: Option<u64>,
}

impl NodeLoop {
    pub fn new(
        cycle: MonitorCycle,
        scheduler: Box<dyn Scheduler>,
        battery: Box<dyn BatteryMonitor>,
        duty: DutyCycle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            cycle,
            scheduler,
            battery,
            duty,
            cancel_token,
            max_cycles: None,
        }
    }

    /// Stop after `n` cycles instead of running until cancelled.
    pub fn with_max_cycles(mut self, n: u64) -> Self {
        self.max_cycles = Some(n);
        self
    }

    pub fn cycle(&self) -> &MonitorCycle {
        &self.cycle
    }

    pub fn cycle_mut(&mut self) -> &mut MonitorCycle {
        &mut self.cycle
    }

    /// Run until cancelled or the cycle limit is reached.
    pub async fn run(&mut self) -> NodeStats {
        let mut stats = NodeStats::default();
        info!(
            tier = %self.cycle.profile().tier,
            interval_secs = self.duty.normal.as_secs(),
            max_cycles = ?self.max_cycles,
            "[NodeLoop] Starting"
        );

        loop {
            if self.cancel_token.is_cancelled() || self.limit_reached(&stats) {
                break;
            }

            let now = self.scheduler.now();
            let outcome = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[NodeLoop] Shutdown signal received mid-cycle");
                    break;
                }
                outcome = self.cycle.run_once(now) => outcome,
            };
            log_outcome(stats.cycles + 1, &outcome);
            stats.record(&outcome);

            if self.limit_reached(&stats) {
                break;
            }

            let delay = match &outcome {
                CycleOutcome::CalibrationPending { retry_in }
                | CycleOutcome::CalibrationFailed { retry_in, .. } => *retry_in,
                _ => self.duty.interval_for(self.battery.read_voltage()),
            };

            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[NodeLoop] Shutdown signal received");
                    break;
                }
                _ = self.scheduler.sleep(delay) => {}
            }
        }

        info!(
            cycles = stats.cycles,
            monitored = stats.monitored,
            alerts = stats.alerts,
            incomplete = stats.incomplete,
            "[NodeLoop] Stopped"
        );
        stats
    }

    fn limit_reached(&self, stats: &NodeStats) -> bool {
        self.max_cycles.is_some_and(|max| stats.cycles >= max)
    }
}

fn log_outcome(cycle: u64, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Calibrated => info!(cycle, "[NodeLoop] Calibrated"),
        CycleOutcome::CalibrationPending { retry_in } => {
            info!(cycle, retry_in_secs = retry_in.as_secs(), "[NodeLoop] Waiting for calibration trigger")
        }
        CycleOutcome::CalibrationFailed { reason, retry_in } => {
            info!(cycle, reason = %reason, retry_in_secs = retry_in.as_secs(), "[NodeLoop] Calibration failed")
        }
        CycleOutcome::Monitored(report) => {
            info!(cycle, sdi = report.sdi, state = %report.alert_state, "[NodeLoop] Cycle complete")
        }
        CycleOutcome::Incomplete(reason) => info!(cycle, reason = %reason, "[NodeLoop] Cycle incomplete"),
    }
}
