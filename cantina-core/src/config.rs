//! Policy configuration with per-field defaults.
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::default_cutoff;
use crate::constants::{AUTO_BLOCK_THRESHOLD_DEFAULT, CUTOFF_CACHE_TTL_SECS};
use crate::weekdays::MON_FRI_MASK;

/// Tunable policy knobs. Hard bounds live in [`crate::constants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Consecutive no-shows that trigger an automatic block.
    #[serde(default = "PolicyConfig::default_auto_block_threshold")]
    pub auto_block_threshold: u32,
    /// Weekday mask applied when neither an override nor a class mask
    /// resolves.
    #[serde(default = "PolicyConfig::default_days_mask")]
    pub default_days_mask: u8,
    /// Cutoff used when no value is stored in state.
    #[serde(default = "PolicyConfig::default_cutoff_time")]
    pub default_cutoff: NaiveTime,
    /// TTL of the cutoff read cache, in seconds.
    #[serde(default = "PolicyConfig::default_cutoff_ttl_secs")]
    pub cutoff_ttl_secs: i64,
    /// Refuse order placement on Saturdays and Sundays.
    #[serde(default = "PolicyConfig::default_weekend_pause")]
    pub weekend_pause: bool,
}

impl PolicyConfig {
    const fn default_auto_block_threshold() -> u32 {
        AUTO_BLOCK_THRESHOLD_DEFAULT
    }

    const fn default_days_mask() -> u8 {
        MON_FRI_MASK
    }

    fn default_cutoff_time() -> NaiveTime {
        default_cutoff()
    }

    const fn default_cutoff_ttl_secs() -> i64 {
        CUTOFF_CACHE_TTL_SECS
    }

    const fn default_weekend_pause() -> bool {
        true
    }

    /// Validate invariants the serde layer cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_block_threshold == 0 {
            return Err(ConfigError::MinViolation {
                field: "auto_block_threshold",
                min: 1,
                value: i64::from(self.auto_block_threshold),
            });
        }
        if self.default_days_mask > 0x7F {
            return Err(ConfigError::MaskOutOfRange {
                value: self.default_days_mask,
            });
        }
        if self.cutoff_ttl_secs < 0 {
            return Err(ConfigError::MinViolation {
                field: "cutoff_ttl_secs",
                min: 0,
                value: self.cutoff_ttl_secs,
            });
        }
        Ok(())
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_block_threshold: Self::default_auto_block_threshold(),
            default_days_mask: Self::default_days_mask(),
            default_cutoff: Self::default_cutoff_time(),
            cutoff_ttl_secs: Self::default_cutoff_ttl_secs(),
            weekend_pause: Self::default_weekend_pause(),
        }
    }
}

/// Errors raised when policy configuration invariants are violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: i64,
        value: i64,
    },
    #[error("weekday mask {value:#x} has bits outside Mon..Sun")]
    MaskOutOfRange { value: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: PolicyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PolicyConfig::default());
        assert_eq!(config.auto_block_threshold, 3);
        assert_eq!(config.default_days_mask, MON_FRI_MASK);
        assert_eq!(config.default_cutoff, NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert!(config.weekend_pause);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"auto_block_threshold": 5, "weekend_pause": false}"#).unwrap();
        assert_eq!(config.auto_block_threshold, 5);
        assert!(!config.weekend_pause);
        assert_eq!(config.default_days_mask, MON_FRI_MASK);
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let mut config = PolicyConfig::default();
        config.auto_block_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MinViolation { field: "auto_block_threshold", .. })
        ));

        let mut config = PolicyConfig::default();
        config.default_days_mask = 0xFF;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MaskOutOfRange { value: 0xFF })
        );

        assert!(PolicyConfig::default().validate().is_ok());
    }
}
