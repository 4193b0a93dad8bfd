//! Hardware tiers and the per-deployment device profile

use serde::{Deserialize, Serialize};

use super::spectrum::bin_count;
use crate::config::defaults::{
    BYTES_PER_FLOAT, DEFAULT_ALERT_SDI_THRESHOLD, DEFAULT_COHERENCE_THRESHOLD,
    DEFAULT_DASF2_ATTENUATION, DEFAULT_DISSIPATION_THRESHOLD, DEFAULT_EPSILON,
};

// ============================================================================
// Hardware Tier
// ============================================================================

/// Budget class of the sensor node.
///
/// - **Low**: 40 kHz ADC, magnitude fingerprint, everything local
/// - **Medium**: 80 kHz ADC, SASF² fingerprint, temperature-compensated, everything local
/// - **High**: 80 kHz ADC, SASF² fingerprint, transform offloaded to a coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HardwareTier {
    #[default]
    Low,
    Medium,
    High,
}

impl std::fmt::Display for HardwareTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareTier::Low => write!(f, "low"),
            HardwareTier::Medium => write!(f, "medium"),
            HardwareTier::High => write!(f, "high"),
        }
    }
}

/// Divergence metric used to compare fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Mean absolute log-magnitude difference on raw magnitude spectra.
    Basic,
    /// Mean absolute difference on SASF²-transformed spectra.
    Sasf2,
}

impl std::fmt::Display for ScoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringMode::Basic => write!(f, "basic"),
            ScoringMode::Sasf2 => write!(f, "sasf2"),
        }
    }
}

// ============================================================================
// DASF² Settings
// ============================================================================

/// Dissipative refinement applied ahead of SASF² weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dasf2Settings {
    pub enabled: bool,
    /// Maximum |ln(mag+ε) − μ| before a bin is attenuated.
    pub dissipation_threshold: f64,
    /// Multiplier applied to attenuated bins.
    pub attenuation: f64,
}

impl Default for Dasf2Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            dissipation_threshold: DEFAULT_DISSIPATION_THRESHOLD,
            attenuation: DEFAULT_DASF2_ATTENUATION,
        }
    }
}

// ============================================================================
// Device Profile
// ============================================================================

/// Immutable signal-processing parameters for one deployment.
///
/// Both ends of a coprocessor link must be built from identical profiles:
/// the frame size is derived from `sample_count()` and never transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub tier: HardwareTier,
    pub sample_rate_hz: f64,
    pub duration_sec: f64,
    pub alert_threshold: f64,
    pub coherence_threshold: f64,
    pub epsilon: f64,
    pub scoring: ScoringMode,
    /// Transform runs on the coprocessor instead of locally.
    pub offload: bool,
    pub dasf2: Dasf2Settings,
    /// Scale samples by the ambient-temperature gain correction.
    #[serde(default)]
    pub temperature_compensation: bool,
}

impl DeviceProfile {
    /// Reference parameters for a hardware tier.
    pub fn for_tier(tier: HardwareTier) -> Self {
        let (sample_rate_hz, scoring, offload, temperature_compensation) = match tier {
            HardwareTier::Low => (40_000.0, ScoringMode::Basic, false, false),
            HardwareTier::Medium => (80_000.0, ScoringMode::Sasf2, false, true),
            HardwareTier::High => (80_000.0, ScoringMode::Sasf2, true, false),
        };
        Self {
            tier,
            sample_rate_hz,
            duration_sec: 0.1,
            alert_threshold: DEFAULT_ALERT_SDI_THRESHOLD,
            coherence_threshold: DEFAULT_COHERENCE_THRESHOLD,
            epsilon: DEFAULT_EPSILON,
            scoring,
            offload,
            dasf2: Dasf2Settings::default(),
            temperature_compensation,
        }
    }

    /// Samples per acquisition: round(sample_rate_hz × duration_sec).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sample_count(&self) -> usize {
        let n = (self.sample_rate_hz * self.duration_sec).round();
        if n.is_finite() && n > 0.0 {
            n as usize
        } else {
            0
        }
    }

    /// One-sided spectrum length: ⌊N/2⌋ + 1.
    pub fn bin_count(&self) -> usize {
        bin_count(self.sample_count())
    }

    /// Exact byte length of one coprocessor frame.
    pub fn frame_len(&self) -> usize {
        self.bin_count() * BYTES_PER_FLOAT
    }

    /// Frequency resolution of one bin in Hz.
    pub fn bin_resolution_hz(&self) -> f64 {
        let n = self.sample_count();
        if n == 0 {
            0.0
        } else {
            self.sample_rate_hz / n as f64
        }
    }

    /// Whether the transform stage runs at all for this profile.
    pub fn uses_transform(&self) -> bool {
        self.scoring == ScoringMode::Sasf2
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::for_tier(HardwareTier::default())
    }
}
