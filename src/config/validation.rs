//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks on the signal-processing parameters.
//!
//! Two-pass parse: the raw TOML is first walked as a `toml::Value` tree and
//! compared against the known key set (warnings only), then deserialized
//! normally and range-checked (errors block startup).

use std::collections::HashSet;

use super::NodeConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ": did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `NodeConfig`.
///
/// Kept in step with the structs in node_config.rs by hand.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [node]
        "node",
        "node.client_id",
        "node.broker",
        // [profile]
        "profile",
        "profile.tier",
        "profile.sample_rate_hz",
        "profile.duration_sec",
        "profile.scoring",
        "profile.offload",
        "profile.temperature_compensation",
        "profile.alert_threshold",
        "profile.coherence_threshold",
        "profile.epsilon",
        // [profile.dasf2]
        "profile.dasf2",
        "profile.dasf2.enabled",
        "profile.dasf2.dissipation_threshold",
        "profile.dasf2.attenuation",
        // [duty_cycle]
        "duty_cycle",
        "duty_cycle.interval_secs",
        "duty_cycle.low_battery_interval_secs",
        "duty_cycle.low_battery_voltage",
        // [calibration]
        "calibration",
        "calibration.trigger_window_ms",
        "calibration.retry_secs",
        "calibration.max_backoff_secs",
        "calibration.fingerprint_path",
        // [coprocessor]
        "coprocessor",
        "coprocessor.addr",
        "coprocessor.timeout_ms",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known key within edit distance 3, ties broken alphabetically.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Warnings for every key in `raw_toml` that `NodeConfig` does not know.
///
/// Never fails: syntax errors are left for the serde pass to report.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

fn require_positive(errors: &mut Vec<String>, field: &str, value: f64) {
    if !value.is_finite() || value <= 0.0 {
        errors.push(format!("{field} = {value} must be a finite number > 0"));
    }
}

/// Range checks on a parsed `NodeConfig`.
///
/// Returns (errors, warnings). Errors are values the pipeline cannot run
/// with; warnings are legal but unusual.
pub fn validate_physical_ranges(config: &NodeConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let p = &config.profile;

    if let Some(rate) = p.sample_rate_hz {
        require_positive(&mut errors, "profile.sample_rate_hz", rate);
    }
    if let Some(duration) = p.duration_sec {
        require_positive(&mut errors, "profile.duration_sec", duration);
    }
    require_positive(&mut errors, "profile.coherence_threshold", p.coherence_threshold);
    require_positive(&mut errors, "profile.epsilon", p.epsilon);
    require_positive(
        &mut errors,
        "profile.dasf2.dissipation_threshold",
        p.dasf2.dissipation_threshold,
    );

    if !p.alert_threshold.is_finite() {
        errors.push(format!(
            "profile.alert_threshold = {} must be finite",
            p.alert_threshold
        ));
    } else if p.alert_threshold < 0.0 {
        // SDI is a mean of absolute values, so every cycle would alert
        warnings.push(ValidationWarning {
            field: "profile.alert_threshold".to_string(),
            message: format!(
                "profile.alert_threshold = {} is negative; every monitored cycle will alert",
                p.alert_threshold
            ),
            suggestion: None,
        });
    }

    let att = p.dasf2.attenuation;
    if !(0.0..=1.0).contains(&att) {
        errors.push(format!(
            "profile.dasf2.attenuation = {att} is outside [0, 1]"
        ));
    }

    if p.epsilon.is_finite() && p.epsilon > 1e-3 {
        warnings.push(ValidationWarning {
            field: "profile.epsilon".to_string(),
            message: format!(
                "profile.epsilon = {:e} is large enough to mask quiet spectral bins",
                p.epsilon
            ),
            suggestion: None,
        });
    }

    let d = &config.duty_cycle;
    if !d.low_battery_voltage.is_finite() || d.low_battery_voltage < 0.0 {
        errors.push(format!(
            "duty_cycle.low_battery_voltage = {} must be a finite number >= 0",
            d.low_battery_voltage
        ));
    }
    if d.interval_secs == Some(0) {
        warnings.push(ValidationWarning {
            field: "duty_cycle.interval_secs".to_string(),
            message: "duty_cycle.interval_secs = 0 runs cycles back to back".to_string(),
            suggestion: None,
        });
    }

    if config.calibration.retry_secs == 0 {
        errors.push("calibration.retry_secs must be > 0".to_string());
    }
    if config.coprocessor.timeout_ms == 0 {
        errors.push("coprocessor.timeout_ms must be > 0".to_string());
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
