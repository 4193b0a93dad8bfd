//! Calibration Flow Tests
//!
//! Trigger handling, capture failures, and fingerprint persistence across
//! node restarts, driven through `MonitorCycle`.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sif_node::acquisition::{RecordingIndicator, ScriptedTrigger, StructuralMode, SyntheticTransducer};
use sif_node::baseline::{load_fingerprint, CalibrationController, RetryBackoff, SCHEMA_VERSION};
use sif_node::pipeline::{CycleOutcome, MonitorCycle, Peripherals, TransformStage};
use sif_node::telemetry::MemoryPublisher;
use sif_node::types::{AlertState, CalibrationState, DeviceProfile, HardwareTier, SpectrumKind};

// ============================================================================
// Helpers
// ============================================================================

fn bench_profile() -> DeviceProfile {
    let mut p = DeviceProfile::for_tier(HardwareTier::Medium);
    p.sample_rate_hz = 8_000.0;
    p.duration_sec = 0.1;
    p.alert_threshold = 1e-3;
    p
}

fn transducer(profile: &DeviceProfile) -> SyntheticTransducer {
    SyntheticTransducer::new(profile.sample_rate_hz, 0.0, Some(5))
        .expect("transducer")
        .with_modes(vec![
            StructuralMode { frequency_hz: 200.0, amplitude: 1.0 },
            StructuralMode { frequency_hz: 900.0, amplitude: 0.4 },
        ])
}

fn controller(path: Option<&Path>) -> CalibrationController {
    let c = CalibrationController::new(RetryBackoff::new(
        Duration::from_secs(10),
        Duration::from_secs(300),
    ));
    match path {
        Some(p) => c.with_persistence(p),
        None => c,
    }
}

fn cycle_with(
    profile: &DeviceProfile,
    calibration: CalibrationController,
    trigger: ScriptedTrigger,
    source: SyntheticTransducer,
    indicator: RecordingIndicator,
) -> MonitorCycle {
    MonitorCycle::new(
        profile.clone(),
        "calib",
        Duration::from_millis(1),
        TransformStage::local(profile),
        calibration,
        Peripherals {
            source: Box::new(source),
            trigger: Box::new(trigger),
            indicator: Box::new(indicator),
            publisher: Box::new(MemoryPublisher::new()),
        },
    )
    .expect("cycle")
}

// ============================================================================
// Trigger and Capture
// ============================================================================

#[tokio::test]
async fn missed_triggers_back_off_then_capture() {
    let profile = bench_profile();
    let mut cycle = cycle_with(
        &profile,
        controller(None),
        ScriptedTrigger::after_misses(3),
        transducer(&profile),
        RecordingIndicator::default(),
    );

    let mut delays = Vec::new();
    loop {
        match cycle.run_once(Utc::now()).await {
            CycleOutcome::CalibrationPending { retry_in } => delays.push(retry_in.as_secs()),
            CycleOutcome::Calibrated => break,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(delays, vec![10, 20, 40]);

    let fp = cycle.calibration().fingerprint().expect("fingerprint held");
    assert_eq!(fp.len(), profile.bin_count());
    assert_eq!(fp.kind(), SpectrumKind::Transformed);
    assert_eq!(fp.profile.tier, HardwareTier::Medium);
}

#[tokio::test]
async fn capture_failure_stays_uncalibrated_and_retries() {
    let profile = bench_profile();
    let indicator = RecordingIndicator::default();
    let mut cycle = cycle_with(
        &profile,
        controller(None),
        ScriptedTrigger::always(),
        transducer(&profile).with_dropouts([0]),
        indicator.clone(),
    );

    match cycle.run_once(Utc::now()).await {
        CycleOutcome::CalibrationFailed { reason, retry_in } => {
            assert!(reason.contains("dropout"), "{reason}");
            assert_eq!(retry_in, Duration::from_secs(10));
        }
        other => panic!("expected CalibrationFailed, got {:?}", other),
    }
    assert_eq!(cycle.calibration().state(), CalibrationState::Uncalibrated);
    assert_eq!(indicator.history(), vec![true, false]);

    assert_eq!(cycle.run_once(Utc::now()).await, CycleOutcome::Calibrated);
    assert_eq!(indicator.last(), Some(false));
}

#[tokio::test]
async fn dropout_while_monitoring_keeps_baseline() {
    let profile = bench_profile();
    let mut cycle = cycle_with(
        &profile,
        controller(None),
        ScriptedTrigger::always(),
        transducer(&profile).with_dropouts([1]),
        RecordingIndicator::default(),
    );
    assert_eq!(cycle.run_once(Utc::now()).await, CycleOutcome::Calibrated);
    assert!(matches!(cycle.run_once(Utc::now()).await, CycleOutcome::Incomplete(_)));
    assert!(cycle.calibration().is_calibrated());
    assert!(matches!(
        cycle.run_once(Utc::now()).await,
        CycleOutcome::Monitored(r) if r.alert_state == AlertState::Normal
    ));
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn fingerprint_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state").join("fingerprint.json");
    let profile = bench_profile();

    {
        let mut first = cycle_with(
            &profile,
            controller(Some(&path)),
            ScriptedTrigger::always(),
            transducer(&profile),
            RecordingIndicator::default(),
        );
        assert_eq!(first.run_once(Utc::now()).await, CycleOutcome::Calibrated);
    }
    assert!(path.exists(), "fingerprint should be written on capture");

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(raw["schema_version"], SCHEMA_VERSION);

    // Restarted node: trigger never fires, so monitoring relies on the file
    let mut restored = controller(Some(&path));
    assert!(restored.restore(&profile));
    let mut second = cycle_with(
        &profile,
        restored,
        ScriptedTrigger::never(),
        transducer(&profile),
        RecordingIndicator::default(),
    );
    match second.run_once(Utc::now()).await {
        CycleOutcome::Monitored(report) => {
            assert!(report.sdi < 1e-6, "sdi = {}", report.sdi);
            assert_eq!(report.alert_state, AlertState::Normal);
        }
        other => panic!("expected Monitored, got {:?}", other),
    }
}

#[tokio::test]
async fn fingerprint_for_other_profile_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fingerprint.json");
    let profile = bench_profile();

    let mut cycle = cycle_with(
        &profile,
        controller(Some(&path)),
        ScriptedTrigger::always(),
        transducer(&profile),
        RecordingIndicator::default(),
    );
    assert_eq!(cycle.run_once(Utc::now()).await, CycleOutcome::Calibrated);

    let mut longer = profile.clone();
    longer.duration_sec = 0.2;
    let mut restored = controller(Some(&path));
    assert!(!restored.restore(&longer));
    assert_eq!(restored.state(), CalibrationState::Uncalibrated);

    let mut basic = profile.clone();
    basic.scoring = sif_node::types::ScoringMode::Basic;
    assert!(!restored.restore(&basic));
}

#[tokio::test]
async fn fingerprint_from_a_different_transform_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fingerprint.json");
    let profile = bench_profile();

    let mut cycle = cycle_with(
        &profile,
        controller(Some(&path)),
        ScriptedTrigger::always(),
        transducer(&profile),
        RecordingIndicator::default(),
    );
    assert_eq!(cycle.run_once(Utc::now()).await, CycleOutcome::Calibrated);

    let mut coherence = profile.clone();
    coherence.coherence_threshold = 0.05;
    let mut dasf2 = profile.clone();
    dasf2.dasf2.enabled = true;
    // 4 kHz × 0.2 s keeps N = 800 but halves the bin spacing
    let mut respaced = profile.clone();
    respaced.sample_rate_hz = 4_000.0;
    respaced.duration_sec = 0.2;
    assert_eq!(respaced.bin_count(), profile.bin_count());

    for other in [coherence, dasf2, respaced] {
        let mut restored = controller(Some(&path));
        assert!(!restored.restore(&other), "restored under {:?}", other);
        assert_eq!(restored.state(), CalibrationState::Uncalibrated);
    }

    // Alerting and offload choices do not change the spectrum
    let mut retuned = profile.clone();
    retuned.alert_threshold = 0.5;
    retuned.offload = true;
    assert!(controller(Some(&path)).restore(&retuned));
}

#[tokio::test]
async fn future_schema_version_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fingerprint.json");
    let profile = bench_profile();

    let mut cycle = cycle_with(
        &profile,
        controller(Some(&path)),
        ScriptedTrigger::always(),
        transducer(&profile),
        RecordingIndicator::default(),
    );
    cycle.run_once(Utc::now()).await;

    let mut raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    raw["schema_version"] = serde_json::json!(SCHEMA_VERSION + 1);
    std::fs::write(&path, raw.to_string()).expect("write");

    assert!(load_fingerprint(&path).is_none());
    assert!(!controller(Some(&path)).restore(&profile));
}

#[tokio::test]
async fn forced_recalibration_discards_persisted_baseline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fingerprint.json");
    let profile = bench_profile();

    let mut cycle = cycle_with(
        &profile,
        controller(Some(&path)),
        ScriptedTrigger::new([true, false], true),
        transducer(&profile),
        RecordingIndicator::default(),
    );
    assert_eq!(cycle.run_once(Utc::now()).await, CycleOutcome::Calibrated);
    assert!(path.exists());

    cycle.calibration_mut().force_recalibrate();
    assert!(!path.exists());
    assert!(cycle.calibration().fingerprint().is_none());

    assert_eq!(
        cycle.run_once(Utc::now()).await,
        CycleOutcome::CalibrationPending { retry_in: Duration::from_secs(10) }
    );
    assert_eq!(cycle.run_once(Utc::now()).await, CycleOutcome::Calibrated);
}
