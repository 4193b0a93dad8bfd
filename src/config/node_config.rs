//! Node Configuration - deployment parameters as operator-tunable TOML values
//!
//! Every tunable of the fingerprint pipeline is a field in this module.
//! Each struct implements `Default` with the reference tier values, so a
//! node with no config file behaves exactly like the low-budget reference.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults::{
    CALIBRATION_MAX_BACKOFF_SECS, CALIBRATION_RETRY_SECS, CONFIG_ENV_VAR, CONFIG_FILE_NAME,
    COPROCESSOR_TIMEOUT_MS, DEFAULT_ALERT_SDI_THRESHOLD, DEFAULT_BROKER, DEFAULT_CLIENT_ID,
    DEFAULT_COHERENCE_THRESHOLD, DEFAULT_DASF2_ATTENUATION, DEFAULT_DISSIPATION_THRESHOLD,
    DEFAULT_EPSILON, DEFAULT_FINGERPRINT_PATH, LOW_BATTERY_INTERVAL_SECS, LOW_BATTERY_VOLTAGE,
    LOW_TIER_INTERVAL_SECS, MONITORING_INTERVAL_SECS, TRIGGER_WINDOW_MS,
};
use crate::types::{Dasf2Settings, DeviceProfile, HardwareTier, ScoringMode};

// ============================================================================
// Config Provenance
// ============================================================================

/// Dotted key paths explicitly present in the user's TOML file.
///
/// Lets callers tell a user-chosen value from a `#[serde(default)]` fill-in,
/// e.g. so a CLI `--tier` flag does not clobber an explicit `profile.tier`.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvenance {
    pub explicit_keys: HashSet<String>,
}

impl ConfigProvenance {
    pub fn is_user_set(&self, dotted_key: &str) -> bool {
        self.explicit_keys.contains(dotted_key)
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one sensor node.
///
/// Load with `NodeConfig::load()` which searches:
/// 1. `$SIF_CONFIG` env var
/// 2. `./node_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identification and telemetry broker
    #[serde(default)]
    pub node: NodeInfo,

    /// Signal-processing profile
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Inter-cycle sleep policy
    #[serde(default)]
    pub duty_cycle: DutyCycleConfig,

    /// Calibration trigger and retry policy
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Coprocessor link (high tier only)
    #[serde(default)]
    pub coprocessor: CoprocessorConfig,
}

impl NodeConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        Self::load_with_provenance().0
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let (config, _provenance) = Self::load_from_file_with_provenance(path)?;
        Ok(config)
    }

    /// Load from a specific TOML file path, also returning provenance.
    pub fn load_from_file_with_provenance(
        path: &Path,
    ) -> Result<(Self, ConfigProvenance), ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse_with_provenance(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys only produce warnings; range violations are errors.
    pub fn parse_with_provenance(contents: &str) -> Result<(Self, ConfigProvenance), ConfigError> {
        for w in &super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let provenance = ConfigProvenance {
            explicit_keys: super::validation::walk_toml_keys(
                &contents
                    .parse::<toml::Value>()
                    .unwrap_or(toml::Value::Table(toml::map::Map::new())),
                "",
            )
            .into_iter()
            .collect(),
        };

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok((config, provenance))
    }

    /// Same search order as `load()`, also returning which keys the user set.
    pub fn load_with_provenance() -> (Self, ConfigProvenance) {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file_with_provenance(&p) {
                    Ok((config, provenance)) => {
                        info!(path = %p.display(), client_id = %config.node.client_id, "Loaded node config from {}", CONFIG_ENV_VAR);
                        return (config, provenance);
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./node_config.toml
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file_with_provenance(&local) {
                Ok((config, provenance)) => {
                    info!(client_id = %config.node.client_id, "Loaded node config from ./{}", CONFIG_FILE_NAME);
                    return (config, provenance);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", CONFIG_FILE_NAME);
                }
            }
        }

        // 3. Defaults: nothing is user-set
        info!("No {} found, using built-in defaults", CONFIG_FILE_NAME);
        (Self::default(), ConfigProvenance::default())
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Resolve the effective device profile: tier reference values with any
    /// explicit overrides applied.
    pub fn device_profile(&self) -> DeviceProfile {
        let p = &self.profile;
        let mut profile = DeviceProfile::for_tier(p.tier);
        if let Some(rate) = p.sample_rate_hz {
            profile.sample_rate_hz = rate;
        }
        if let Some(duration) = p.duration_sec {
            profile.duration_sec = duration;
        }
        if let Some(scoring) = p.scoring {
            profile.scoring = scoring;
        }
        if let Some(offload) = p.offload {
            profile.offload = offload;
        }
        if let Some(compensate) = p.temperature_compensation {
            profile.temperature_compensation = compensate;
        }
        profile.alert_threshold = p.alert_threshold;
        profile.coherence_threshold = p.coherence_threshold;
        profile.epsilon = p.epsilon;
        profile.dasf2 = Dasf2Settings {
            enabled: p.dasf2.enabled,
            dissipation_threshold: p.dasf2.dissipation_threshold,
            attenuation: p.dasf2.attenuation,
        };
        profile
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Sampling rate and duration must give at least one sample
    /// - Coherence threshold and epsilon must be positive
    /// - Offloading requires SASF² scoring and a coprocessor address
    /// - Backoff ceiling must be >= the base retry delay
    /// - Every float is finite (checked per field by the range pass)
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let (range_errors, range_warnings) = super::validation::validate_physical_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        let profile = self.device_profile();
        if profile.sample_count() == 0 {
            errors.push(format!(
                "profile: sample_rate_hz ({}) × duration_sec ({}) must yield at least one sample",
                profile.sample_rate_hz, profile.duration_sec
            ));
        }

        if profile.offload {
            if profile.scoring != ScoringMode::Sasf2 {
                errors.push(
                    "profile.offload requires profile.scoring = \"sasf2\" (only the transform is offloaded)"
                        .to_string(),
                );
            }
            if self.coprocessor.addr.as_deref().map_or(true, str::is_empty) {
                errors.push("profile.offload is enabled but coprocessor.addr is not set".to_string());
            }
        }

        if self.calibration.max_backoff_secs < self.calibration.retry_secs {
            errors.push(format!(
                "calibration.max_backoff_secs ({}) must be >= retry_secs ({})",
                self.calibration.max_backoff_secs, self.calibration.retry_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Node Info
// ============================================================================

/// Identification used in telemetry topics and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique client identifier, used in `sif/{client_id}/...` topics
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Telemetry broker host
    #[serde(default = "default_broker")]
    pub broker: String,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}
fn default_broker() -> String {
    DEFAULT_BROKER.to_string()
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            broker: default_broker(),
        }
    }
}

// ============================================================================
// Profile Config
// ============================================================================

/// Signal-processing parameters. `None` fields take the tier reference value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub tier: HardwareTier,

    /// Override of the tier sampling rate (Hz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<f64>,

    /// Override of the tier acquisition window (s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,

    /// Override of the tier scoring mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringMode>,

    /// Override of the tier offload choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offload: Option<bool>,

    /// Override of the tier temperature-compensation choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_compensation: Option<bool>,

    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    #[serde(default = "default_coherence_threshold")]
    pub coherence_threshold: f64,

    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    #[serde(default)]
    pub dasf2: Dasf2Config,
}

fn default_alert_threshold() -> f64 { DEFAULT_ALERT_SDI_THRESHOLD }
fn default_coherence_threshold() -> f64 { DEFAULT_COHERENCE_THRESHOLD }
fn default_epsilon() -> f64 { DEFAULT_EPSILON }

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            tier: HardwareTier::default(),
            sample_rate_hz: None,
            duration_sec: None,
            scoring: None,
            offload: None,
            temperature_compensation: None,
            alert_threshold: default_alert_threshold(),
            coherence_threshold: default_coherence_threshold(),
            epsilon: default_epsilon(),
            dasf2: Dasf2Config::default(),
        }
    }
}

/// DASF² dissipative refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dasf2Config {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_dissipation_threshold")]
    pub dissipation_threshold: f64,

    #[serde(default = "default_attenuation")]
    pub attenuation: f64,
}

fn default_dissipation_threshold() -> f64 { DEFAULT_DISSIPATION_THRESHOLD }
fn default_attenuation() -> f64 { DEFAULT_DASF2_ATTENUATION }

impl Default for Dasf2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            dissipation_threshold: default_dissipation_threshold(),
            attenuation: default_attenuation(),
        }
    }
}

// ============================================================================
// Duty Cycle Config
// ============================================================================

/// Sleep between cycles. Shorter on a healthy battery, longer when low.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutyCycleConfig {
    /// Normal interval (s). `None` takes the tier default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    #[serde(default = "default_low_battery_interval")]
    pub low_battery_interval_secs: u64,

    #[serde(default = "default_low_battery_voltage")]
    pub low_battery_voltage: f64,
}

fn default_low_battery_interval() -> u64 { LOW_BATTERY_INTERVAL_SECS }
fn default_low_battery_voltage() -> f64 { LOW_BATTERY_VOLTAGE }

impl Default for DutyCycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            low_battery_interval_secs: default_low_battery_interval(),
            low_battery_voltage: default_low_battery_voltage(),
        }
    }
}

impl DutyCycleConfig {
    /// Effective normal interval for a tier.
    pub fn interval_for(&self, tier: HardwareTier) -> Duration {
        let secs = self.interval_secs.unwrap_or(match tier {
            HardwareTier::Low => LOW_TIER_INTERVAL_SECS,
            HardwareTier::Medium | HardwareTier::High => MONITORING_INTERVAL_SECS,
        });
        Duration::from_secs(secs)
    }
}

// ============================================================================
// Calibration Config
// ============================================================================

/// Calibration trigger listening and retry backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Listen window passed to the trigger detector (ms)
    #[serde(default = "default_trigger_window_ms")]
    pub trigger_window_ms: u64,

    /// First retry delay when no trigger was seen (s)
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    /// Retry delay ceiling (s)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Where to persist the baseline fingerprint. Empty string disables persistence.
    #[serde(default = "default_fingerprint_path")]
    pub fingerprint_path: String,
}

fn default_trigger_window_ms() -> u64 { TRIGGER_WINDOW_MS }
fn default_retry_secs() -> u64 { CALIBRATION_RETRY_SECS }
fn default_max_backoff_secs() -> u64 { CALIBRATION_MAX_BACKOFF_SECS }
fn default_fingerprint_path() -> String { DEFAULT_FINGERPRINT_PATH.to_string() }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            trigger_window_ms: default_trigger_window_ms(),
            retry_secs: default_retry_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            fingerprint_path: default_fingerprint_path(),
        }
    }
}

impl CalibrationConfig {
    pub fn trigger_window(&self) -> Duration {
        Duration::from_millis(self.trigger_window_ms)
    }

    pub fn fingerprint_path(&self) -> Option<PathBuf> {
        if self.fingerprint_path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.fingerprint_path))
        }
    }
}

// ============================================================================
// Coprocessor Config
// ============================================================================

/// Byte-stream link to the transform coprocessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoprocessorConfig {
    /// `host:port` of the coprocessor (TCP bridge to the UART)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,

    /// Response timeout per request (ms)
    #[serde(default = "default_coprocessor_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_coprocessor_timeout_ms() -> u64 { COPROCESSOR_TIMEOUT_MS }

impl Default for CoprocessorConfig {
    fn default() -> Self {
        Self {
            addr: None,
            timeout_ms: default_coprocessor_timeout_ms(),
        }
    }
}

impl CoprocessorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
