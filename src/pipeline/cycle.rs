//! One monitoring iteration.
//!
//! A cycle does exactly one of two things:
//!
//! - **calibrate** while no baseline is held: listen for the trigger, and on
//!   trigger capture the baseline fingerprint
//! - **monitor** once calibrated: sample → compensate → estimate → transform
//!   → score → evaluate → report
//!
//! Failures never escape: they come back as a `CycleOutcome` and leave the
//! calibration state consistent for the next cycle.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::acquisition::{
    compensation_factor, AcquisitionError, Actuator, CalibrationTriggerDetector, SignalAcquisition,
    TemperatureSource,
};
use crate::baseline::{CalibrationController, CalibrationError, CalibrationStep};
use crate::coprocessor::{BoxedLink, LinkError};
use crate::processing::{self, ProcessingError, SpectralEstimator, SpectralTransform};
use crate::config::defaults::REFERENCE_TEMPERATURE_C;
use crate::telemetry::{StatusRecord, TelemetryPublisher, TelemetryRecord};
use crate::types::{
    AlertState, DeviceProfile, MagnitudeSpectrum, SampleBuffer, Spectrum, TransformedSpectrum,
};

// ============================================================================
// Outcomes
// ============================================================================

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Baseline captured; monitoring starts next cycle.
    Calibrated,
    /// No trigger seen; listen again after `retry_in`.
    CalibrationPending { retry_in: Duration },
    /// Trigger seen but the capture failed; still uncalibrated.
    CalibrationFailed { reason: String, retry_in: Duration },
    /// Fingerprint scored against the baseline.
    Monitored(CycleReport),
    /// Monitoring attempt abandoned (sensor or link failure).
    Incomplete(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub sdi: f64,
    pub alert_state: AlertState,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

// ============================================================================
// Transform Stage
// ============================================================================

/// Where the SASF² transform runs.
pub enum TransformStage {
    Local(SpectralTransform),
    Offload { link: BoxedLink, timeout: Duration },
}

impl TransformStage {
    pub fn local(profile: &DeviceProfile) -> Self {
        TransformStage::Local(SpectralTransform::from_profile(profile))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransformStage::Local(_) => "local",
            TransformStage::Offload { .. } => "coprocessor",
        }
    }

    async fn apply(&mut self, spectrum: &MagnitudeSpectrum) -> Result<TransformedSpectrum, LinkError> {
        match self {
            TransformStage::Local(t) => Ok(t.transform(spectrum)),
            TransformStage::Offload { link, timeout } => link.exchange(spectrum, *timeout).await,
        }
    }
}

impl std::fmt::Debug for TransformStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformStage::Local(t) => f.debug_tuple("Local").field(t).finish(),
            TransformStage::Offload { link, timeout } => f
                .debug_struct("Offload")
                .field("link", link)
                .field("timeout", timeout)
                .finish(),
        }
    }
}

// ============================================================================
// Monitor Cycle
// ============================================================================

/// Hardware around the pipeline.
pub struct Peripherals {
    pub source: Box<dyn SignalAcquisition>,
    pub trigger: Box<dyn CalibrationTriggerDetector>,
    pub indicator: Box<dyn Actuator>,
    pub publisher: Box<dyn TelemetryPublisher>,
}

pub struct MonitorCycle {
    profile: DeviceProfile,
    client_id: String,
    trigger_window: Duration,
    estimator: SpectralEstimator,
    transform: TransformStage,
    calibration: CalibrationController,
    peripherals: Peripherals,
    temperature: Option<Box<dyn TemperatureSource>>,
    alert_state: AlertState,
}

impl MonitorCycle {
    pub fn new(
        profile: DeviceProfile,
        client_id: impl Into<String>,
        trigger_window: Duration,
        transform: TransformStage,
        calibration: CalibrationController,
        peripherals: Peripherals,
    ) -> Result<Self, ProcessingError> {
        let estimator = SpectralEstimator::for_profile(&profile)?;
        info!(
            tier = %profile.tier,
            samples = estimator.size(),
            bins = estimator.bin_count(),
            scoring = %profile.scoring,
            transform = transform.label(),
            source = peripherals.source.source_name(),
            "[Cycle] Monitor cycle ready"
        );
        Ok(Self {
            profile,
            client_id: client_id.into(),
            trigger_window,
            estimator,
            transform,
            calibration,
            peripherals,
            temperature: None,
            alert_state: AlertState::Normal,
        })
    }

    /// Attach the probe read for temperature compensation. Without one,
    /// samples are compensated as if at the reference temperature.
    pub fn with_temperature_source(mut self, probe: Box<dyn TemperatureSource>) -> Self {
        self.temperature = Some(probe);
        self
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationController {
        &mut self.calibration
    }

    /// Alert level of the last monitored cycle.
    pub fn alert_state(&self) -> AlertState {
        self.alert_state
    }

    /// Run one iteration.
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        if self.calibration.is_calibrated() {
            self.monitor(now).await
        } else {
            self.calibrate(now).await
        }
    }

    async fn calibrate(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        let triggered = self.peripherals.trigger.poll_trigger(self.trigger_window).await;
        match self.calibration.observe_trigger(triggered) {
            CalibrationStep::Listen { retry_in } => CycleOutcome::CalibrationPending { retry_in },
            CalibrationStep::AlreadyCalibrated => CycleOutcome::Calibrated,
            CalibrationStep::Capture => {
                self.peripherals.indicator.set_indicator(true);
                let captured = match self.capture().await {
                    Ok(spectrum) => self
                        .calibration
                        .complete(spectrum, &self.profile, now)
                        .map(|_| ())
                        .map_err(CycleError::from),
                    Err(e) => {
                        self.calibration.abort(&e.to_string());
                        Err(e)
                    }
                };
                self.peripherals.indicator.set_indicator(false);
                match captured {
                    Ok(()) => {
                        let status = StatusRecord::calibrated(now, &self.client_id);
                        let (topic, payload) = status.message();
                        self.send(&topic, &payload).await;
                        CycleOutcome::Calibrated
                    }
                    Err(e) => CycleOutcome::CalibrationFailed {
                        reason: e.to_string(),
                        retry_in: self.calibration.retry_delay(),
                    },
                }
            }
        }
    }

    async fn monitor(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        let sdi = match self.capture().await {
            Ok(current) => match self.calibration.fingerprint() {
                Some(baseline) => processing::score(&baseline.spectrum, &current, self.profile.epsilon),
                None => return CycleOutcome::Incomplete("no baseline fingerprint".to_string()),
            },
            // A window the estimator rejects cannot be compared
            Err(CycleError::Processing(e)) => {
                warn!(error = %e, "[Cycle] Sample window rejected, scoring as divergent");
                f64::INFINITY
            }
            Err(e) => {
                warn!(error = %e, "[Cycle] Monitoring attempt abandoned");
                return CycleOutcome::Incomplete(e.to_string());
            }
        };

        let alert_state = processing::evaluate(sdi, &self.profile);
        if alert_state != self.alert_state {
            info!(from = %self.alert_state, to = %alert_state, sdi, "[Cycle] Alert state changed");
        }
        self.alert_state = alert_state;
        self.peripherals.indicator.set_indicator(alert_state.is_alert());

        let report = CycleReport {
            timestamp: now,
            sdi,
            alert_state,
        };
        self.publish(&report).await;
        CycleOutcome::Monitored(report)
    }

    /// Acquire one window and reduce it to the profile's fingerprint kind.
    ///
    /// A window of the wrong length is left for the estimator to reject.
    async fn capture(&mut self) -> Result<Spectrum, CycleError> {
        let buffer = self.peripherals.source.acquire(self.estimator.size()).await?;
        let buffer = self.compensate(buffer).await;
        debug!(samples = buffer.len(), rms = buffer.rms(), "[Cycle] Window acquired");
        let magnitudes = self.estimator.estimate(&buffer)?;
        if !self.profile.uses_transform() {
            return Ok(magnitudes.into());
        }
        let transformed = self.transform.apply(&magnitudes).await?;
        debug!(bins = transformed.len(), stage = self.transform.label(), "[Cycle] Spectrum transformed");
        Ok(transformed.into())
    }

    /// Apply the temperature gain correction when the profile asks for it.
    ///
    /// An unreadable probe falls back to the reference temperature.
    async fn compensate(&mut self, buffer: SampleBuffer) -> SampleBuffer {
        if !self.profile.temperature_compensation {
            return buffer;
        }
        let temperature_c = match self.temperature.as_mut() {
            None => REFERENCE_TEMPERATURE_C,
            Some(probe) => match probe.read_celsius().await {
                Ok(t) if t.is_finite() => t,
                Ok(t) => {
                    warn!(reading = t, "[Cycle] Non-finite temperature reading, using reference");
                    REFERENCE_TEMPERATURE_C
                }
                Err(e) => {
                    warn!(error = %e, "[Cycle] Temperature probe unavailable, using reference");
                    REFERENCE_TEMPERATURE_C
                }
            },
        };
        let factor = compensation_factor(temperature_c);
        debug!(temperature_c, factor, "[Cycle] Temperature compensation");
        buffer.scaled(factor)
    }

    async fn publish(&mut self, report: &CycleReport) {
        let record = TelemetryRecord {
            timestamp: report.timestamp,
            client_id: self.client_id.clone(),
            sdi: report.sdi,
            alert_state: report.alert_state,
        };
        for (topic, payload) in record.messages() {
            self.send(&topic, &payload).await;
        }
    }

    async fn send(&mut self, topic: &str, payload: &serde_json::Value) {
        if let Err(e) = self.peripherals.publisher.publish(topic, payload).await {
            warn!(topic, error = %e, "[Telemetry] Publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{FixedTemperature, RecordingIndicator, ScriptedTrigger, SyntheticTransducer};
    use crate::baseline::RetryBackoff;
    use crate::telemetry::MemoryPublisher;
    use crate::types::{CalibrationState, HardwareTier};

    fn small_profile(scoring_tier: HardwareTier) -> DeviceProfile {
        let mut p = DeviceProfile::for_tier(scoring_tier);
        p.sample_rate_hz = 8_000.0;
        p.duration_sec = 0.05;
        p
    }

    fn cycle(
        profile: DeviceProfile,
        trigger: ScriptedTrigger,
        transducer: SyntheticTransducer,
        indicator: RecordingIndicator,
        publisher: MemoryPublisher,
    ) -> MonitorCycle {
        let calibration = CalibrationController::new(RetryBackoff::new(
            Duration::from_secs(10),
            Duration::from_secs(300),
        ));
        MonitorCycle::new(
            profile.clone(),
            "test_node",
            Duration::from_millis(1),
            TransformStage::local(&profile),
            calibration,
            Peripherals {
                source: Box::new(transducer),
                trigger: Box::new(trigger),
                indicator: Box::new(indicator),
                publisher: Box::new(publisher),
            },
        )
        .expect("cycle")
    }

    fn transducer(profile: &DeviceProfile) -> SyntheticTransducer {
        SyntheticTransducer::new(profile.sample_rate_hz, 0.01, Some(42)).expect("transducer")
    }

    #[tokio::test]
    async fn test_calibrates_then_monitors() {
        let profile = small_profile(HardwareTier::Medium);
        let indicator = RecordingIndicator::default();
        let publisher = MemoryPublisher::new();
        let mut c = cycle(
            profile.clone(),
            ScriptedTrigger::always(),
            transducer(&profile),
            indicator.clone(),
            publisher.clone(),
        );

        assert_eq!(c.run_once(Utc::now()).await, CycleOutcome::Calibrated);
        assert_eq!(c.calibration().state(), CalibrationState::Calibrated);
        assert_eq!(indicator.history(), vec![true, false]);
        let status = publisher.on_topic("sif/test_node/status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0]["status"], "Calibrated");
        assert_eq!(publisher.messages().len(), 1, "calibration publishes status only");

        match c.run_once(Utc::now()).await {
            CycleOutcome::Monitored(report) => {
                assert!(report.sdi.is_finite());
                assert_eq!(report.alert_state, AlertState::Normal);
            }
            other => panic!("expected Monitored, got {:?}", other),
        }
        assert_eq!(publisher.on_topic("sif/test_node/data").len(), 1);
        assert!(publisher.on_topic("sif/test_node/alert").is_empty());
    }

    #[tokio::test]
    async fn test_no_trigger_is_pending() {
        let profile = small_profile(HardwareTier::Low);
        let mut c = cycle(
            profile.clone(),
            ScriptedTrigger::never(),
            transducer(&profile),
            RecordingIndicator::default(),
            MemoryPublisher::new(),
        );
        assert_eq!(
            c.run_once(Utc::now()).await,
            CycleOutcome::CalibrationPending { retry_in: Duration::from_secs(10) }
        );
        assert_eq!(c.calibration().state(), CalibrationState::Uncalibrated);
    }

    #[tokio::test]
    async fn test_sensor_failure_during_calibration() {
        let profile = small_profile(HardwareTier::Low);
        let indicator = RecordingIndicator::default();
        let mut c = cycle(
            profile.clone(),
            ScriptedTrigger::always(),
            transducer(&profile).with_dropouts([0]),
            indicator.clone(),
            MemoryPublisher::new(),
        );
        match c.run_once(Utc::now()).await {
            CycleOutcome::CalibrationFailed { retry_in, .. } => {
                assert_eq!(retry_in, Duration::from_secs(10));
            }
            other => panic!("expected CalibrationFailed, got {:?}", other),
        }
        assert!(c.calibration().fingerprint().is_none());
        assert_eq!(indicator.last(), Some(false));
        assert_eq!(c.run_once(Utc::now()).await, CycleOutcome::Calibrated);
    }

    #[tokio::test]
    async fn test_sensor_failure_while_monitoring_is_incomplete() {
        let profile = small_profile(HardwareTier::Low);
        let publisher = MemoryPublisher::new();
        let mut c = cycle(
            profile.clone(),
            ScriptedTrigger::always(),
            transducer(&profile).with_dropouts([1]),
            RecordingIndicator::default(),
            publisher.clone(),
        );
        assert_eq!(c.run_once(Utc::now()).await, CycleOutcome::Calibrated);
        assert!(matches!(c.run_once(Utc::now()).await, CycleOutcome::Incomplete(_)));
        assert!(c.calibration().is_calibrated(), "a failed cycle must not drop the baseline");
        assert!(publisher.on_topic("sif/test_node/data").is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_abort_cycle() {
        let profile = small_profile(HardwareTier::Low);
        let mut c = cycle(
            profile.clone(),
            ScriptedTrigger::always(),
            transducer(&profile),
            RecordingIndicator::default(),
            MemoryPublisher::failing(),
        );
        c.run_once(Utc::now()).await;
        assert!(matches!(c.run_once(Utc::now()).await, CycleOutcome::Monitored(_)));
    }

    /// Returns `len` zeros whatever was asked for.
    struct FixedLengthSource {
        len: usize,
    }

    #[async_trait::async_trait]
    impl SignalAcquisition for FixedLengthSource {
        async fn acquire(&mut self, _n: usize) -> Result<crate::types::SampleBuffer, AcquisitionError> {
            Ok(crate::types::SampleBuffer::silent(self.len))
        }

        fn source_name(&self) -> &str {
            "fixed-length"
        }
    }

    fn calibrated_with_source(profile: &DeviceProfile, len: usize) -> MonitorCycle {
        let mut c = cycle(
            profile.clone(),
            ScriptedTrigger::always(),
            transducer(profile),
            RecordingIndicator::default(),
            MemoryPublisher::new(),
        );
        c.peripherals.source = Box::new(FixedLengthSource { len });
        c
    }

    #[tokio::test]
    async fn test_rejected_window_scores_as_alert() {
        let profile = small_profile(HardwareTier::Low);
        let n = profile.sample_count();
        let mut c = calibrated_with_source(&profile, n);
        assert_eq!(c.run_once(Utc::now()).await, CycleOutcome::Calibrated);

        c.peripherals.source = Box::new(FixedLengthSource { len: n + 1 });
        match c.run_once(Utc::now()).await {
            CycleOutcome::Monitored(report) => {
                assert_eq!(report.sdi, f64::INFINITY);
                assert_eq!(report.alert_state, AlertState::Alert);
            }
            other => panic!("expected Monitored, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_and_short_windows_score_as_alert() {
        let profile = small_profile(HardwareTier::Low);
        let n = profile.sample_count();
        for len in [0, 1, n - 1] {
            let mut c = calibrated_with_source(&profile, n);
            assert_eq!(c.run_once(Utc::now()).await, CycleOutcome::Calibrated);

            c.peripherals.source = Box::new(FixedLengthSource { len });
            match c.run_once(Utc::now()).await {
                CycleOutcome::Monitored(report) => {
                    assert_eq!(report.sdi, f64::INFINITY, "len {len}");
                    assert_eq!(report.alert_state, AlertState::Alert, "len {len}");
                }
                other => panic!("len {len}: expected Monitored, got {:?}", other),
            }
            assert!(c.calibration().is_calibrated());
        }
    }

    #[tokio::test]
    async fn test_empty_window_fails_calibration() {
        let profile = small_profile(HardwareTier::Low);
        let mut c = calibrated_with_source(&profile, 0);
        match c.run_once(Utc::now()).await {
            CycleOutcome::CalibrationFailed { reason, .. } => {
                assert!(reason.contains("empty"), "{reason}");
            }
            other => panic!("expected CalibrationFailed, got {:?}", other),
        }
        assert_eq!(c.calibration().state(), CalibrationState::Uncalibrated);
    }

    // ------------------------------------------------------------------
    // Temperature compensation
    // ------------------------------------------------------------------

    struct BrokenProbe;

    #[async_trait::async_trait]
    impl TemperatureSource for BrokenProbe {
        async fn read_celsius(&mut self) -> Result<f64, AcquisitionError> {
            Err(AcquisitionError::SensorUnavailable("no DS18B20 on the bus".to_string()))
        }
    }

    fn medium_cycle() -> MonitorCycle {
        let profile = small_profile(HardwareTier::Medium);
        cycle(
            profile.clone(),
            ScriptedTrigger::always(),
            transducer(&profile),
            RecordingIndicator::default(),
            MemoryPublisher::new(),
        )
    }

    #[tokio::test]
    async fn test_compensation_scales_samples() {
        let mut c = medium_cycle().with_temperature_source(Box::new(FixedTemperature(35.0)));
        let out = c.compensate(SampleBuffer::new(vec![1.0, -2.0])).await;
        assert!((out.as_slice()[0] - 1.01).abs() < 1e-12);
        assert!((out.as_slice()[1] + 2.02).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_compensation_can_be_switched_off() {
        let mut c = medium_cycle().with_temperature_source(Box::new(FixedTemperature(35.0)));
        c.profile.temperature_compensation = false;
        let out = c.compensate(SampleBuffer::new(vec![1.0, -2.0])).await;
        assert_eq!(out.as_slice(), &[1.0, -2.0]);
    }

    #[tokio::test]
    async fn test_missing_or_broken_probe_uses_reference() {
        let mut bare = medium_cycle();
        let out = bare.compensate(SampleBuffer::new(vec![0.5])).await;
        assert_eq!(out.as_slice(), &[0.5]);

        let mut broken = medium_cycle().with_temperature_source(Box::new(BrokenProbe));
        let out = broken.compensate(SampleBuffer::new(vec![0.5])).await;
        assert_eq!(out.as_slice(), &[0.5]);

        let mut nan = medium_cycle().with_temperature_source(Box::new(FixedTemperature(f64::NAN)));
        let out = nan.compensate(SampleBuffer::new(vec![0.5])).await;
        assert_eq!(out.as_slice(), &[0.5]);
    }
}
