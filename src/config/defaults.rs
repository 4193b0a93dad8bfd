//! System-wide default constants.
//!
//! Centralises magic numbers used by the profile table, the duty cycle and
//! the coprocessor link. Grouped by subsystem for easy discovery.

// ============================================================================
// Signal Processing
// ============================================================================

/// Added inside every logarithm to keep ln(0) out of the pipeline.
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// SASF² coherence threshold (decay scale of the coherence factor).
pub const DEFAULT_COHERENCE_THRESHOLD: f64 = 0.5;

/// SDI above which a cycle is reported as an alert.
pub const DEFAULT_ALERT_SDI_THRESHOLD: f64 = 500.0;

/// DASF² dissipation threshold D, in natural-log units around the spectral mean.
pub const DEFAULT_DISSIPATION_THRESHOLD: f64 = 3.0;

/// DASF² multiplier for bins beyond the dissipation threshold.
pub const DEFAULT_DASF2_ATTENUATION: f64 = 0.1;

// ============================================================================
// Temperature Compensation
// ============================================================================

/// Temperature at which the transducer gain is nominal (°C).
pub const REFERENCE_TEMPERATURE_C: f64 = 25.0;

/// Fractional gain correction per °C away from the reference.
pub const TEMPERATURE_COEFFICIENT_PER_C: f64 = 0.001;

// ============================================================================
// Coprocessor Link
// ============================================================================

/// Bytes per spectrum value on the wire (IEEE-754 binary32).
pub const BYTES_PER_FLOAT: usize = 4;

/// Maximum wait for a full coprocessor response (ms).
pub const COPROCESSOR_TIMEOUT_MS: u64 = 1_000;

/// Default coprocessor listen address (TCP stand-in for the UART).
pub const COPROCESSOR_LISTEN_ADDR: &str = "127.0.0.1:7878";

// ============================================================================
// Duty Cycle
// ============================================================================

/// Sleep between cycles on battery-powered low-tier nodes (seconds). 300 = 5 min.
pub const LOW_TIER_INTERVAL_SECS: u64 = 300;

/// Sleep between cycles on mains-powered medium/high-tier nodes (seconds).
pub const MONITORING_INTERVAL_SECS: u64 = 60;

/// Sleep between cycles when the battery is low (seconds). 600 = 10 min.
pub const LOW_BATTERY_INTERVAL_SECS: u64 = 600;

/// Battery voltage below which the low-battery interval is used.
pub const LOW_BATTERY_VOLTAGE: f64 = 3.2;

// ============================================================================
// Calibration
// ============================================================================

/// First retry delay after the calibration trigger was not observed (seconds).
pub const CALIBRATION_RETRY_SECS: u64 = 10;

/// Ceiling for the calibration retry backoff (seconds).
pub const CALIBRATION_MAX_BACKOFF_SECS: u64 = 300;

/// Listen window for the calibration tap pattern (ms).
pub const TRIGGER_WINDOW_MS: u64 = 2_000;

/// Where the baseline fingerprint is persisted between restarts.
pub const DEFAULT_FINGERPRINT_PATH: &str = "data/baseline_fingerprint.json";

// ============================================================================
// Telemetry
// ============================================================================

/// Client identifier used in telemetry topics when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "sif_node_01";

/// Default MQTT broker host.
pub const DEFAULT_BROKER: &str = "broker.hivemq.com";

// ============================================================================
// Config Loading
// ============================================================================

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SIF_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "node_config.toml";
