//! Monitoring Pipeline
//!
//! ```text
//! NodeLoop ─┬─ MonitorCycle ── calibrate | sample → estimate → transform → score → evaluate → report
//!           ├─ DutyCycle     ── battery voltage → sleep interval
//!           └─ Scheduler     ── clock + sleep (tokio or simulated)
//! ```
//!
//! Cycles run strictly one after another on a single task. Cancellation is
//! checked between cycles, during a cycle, and during the sleep.

mod cycle;
mod node_loop;
mod scheduler;

pub use cycle::{CycleError, CycleOutcome, CycleReport, MonitorCycle, Peripherals, TransformStage};
pub use node_loop::{NodeLoop, NodeStats};
pub use scheduler::{DutyCycle, Scheduler, SimulatedScheduler, TokioScheduler};
