//! Bitrate model: quality tiers, target bitrate and output size estimates.
//!
//! Everything here is a pure function of its arguments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User-selectable trade-off between file size and visual quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityTier {
    VeryHigh,
    High,
    #[default]
    Medium,
    Low,
    VeryLow,
}

impl QualityTier {
    /// All tiers, best quality first.
    pub const ALL: [QualityTier; 5] = [
        QualityTier::VeryHigh,
        QualityTier::High,
        QualityTier::Medium,
        QualityTier::Low,
        QualityTier::VeryLow,
    ];

    /// Fraction of the source bitrate retained by this tier.
    pub const fn ratio(self) -> f64 {
        match self {
            QualityTier::VeryHigh => 0.6,
            QualityTier::High => 0.4,
            QualityTier::Medium => 0.3,
            QualityTier::Low => 0.2,
            QualityTier::VeryLow => 0.1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            QualityTier::VeryHigh => "very-high",
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
            QualityTier::VeryLow => "very-low",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no quality tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality tier '{0}' (expected one of: very-high, high, medium, low, very-low)")]
pub struct ParseQualityTierError(String);

impl FromStr for QualityTier {
    type Err = ParseQualityTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        QualityTier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized)
            .ok_or_else(|| ParseQualityTierError(s.to_string()))
    }
}

/// Target bitrate for `tier`, in bits per second. Not clamped.
pub fn target_bitrate(source_bps: f64, tier: QualityTier) -> f64 {
    source_bps * tier.ratio()
}

/// A-priori output size in bytes: `floor(target_bps * duration / 8)`.
///
/// Ignores audio and container overhead. Non-finite or negative products
/// yield 0.
pub fn estimated_output_size_bytes(target_bps: f64, duration_secs: f64) -> i64 {
    let bytes = (target_bps * duration_secs / 8.0).floor();
    if !bytes.is_finite() || bytes <= 0.0 {
        return 0;
    }
    // `as` saturates at i64::MAX
    bytes as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios_strictly_decrease() {
        let source = 8_000_000.0;
        let targets: Vec<f64> = QualityTier::ALL
            .iter()
            .map(|&tier| target_bitrate(source, tier))
            .collect();
        assert!(targets.windows(2).all(|w| w[0] > w[1]), "{targets:?}");
    }

    #[test]
    fn test_medium_scenario() {
        let target = target_bitrate(8_000_000.0, QualityTier::Medium);
        assert!((target - 2_400_000.0).abs() < 1e-6);
        assert_eq!(estimated_output_size_bytes(target, 10.0), 3_000_000);
    }

    #[test]
    fn test_zero_source_bitrate() {
        for tier in QualityTier::ALL {
            let target = target_bitrate(0.0, tier);
            assert_eq!(target, 0.0);
            assert_eq!(estimated_output_size_bytes(target, 10.0), 0);
        }
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let a = estimated_output_size_bytes(1_234_567.0, 42.5);
        let b = estimated_output_size_bytes(1_234_567.0, 42.5);
        assert_eq!(a, b);
        assert_eq!(a, 6_558_637);
    }

    #[test]
    fn test_degenerate_inputs_never_negative() {
        assert_eq!(estimated_output_size_bytes(-5.0, 10.0), 0);
        assert_eq!(estimated_output_size_bytes(f64::NAN, 10.0), 0);
        assert_eq!(estimated_output_size_bytes(f64::INFINITY, 10.0), 0);
        assert_eq!(estimated_output_size_bytes(1000.0, 0.0), 0);
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("very-high".parse::<QualityTier>().unwrap(), QualityTier::VeryHigh);
        assert_eq!("Very_Low".parse::<QualityTier>().unwrap(), QualityTier::VeryLow);
        assert_eq!(" medium ".parse::<QualityTier>().unwrap(), QualityTier::Medium);
        assert!("ultra".parse::<QualityTier>().is_err());

        for tier in QualityTier::ALL {
            assert_eq!(tier.to_string().parse::<QualityTier>().unwrap(), tier);
        }
    }

    #[test]
    fn test_tier_serde_uses_kebab_case() {
        let json = serde_json::to_string(&QualityTier::VeryHigh).unwrap();
        assert_eq!(json, "\"very-high\"");
        let tier: QualityTier = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(tier, QualityTier::Low);
    }
}
