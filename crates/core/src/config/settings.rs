//! Runtime settings with profile support.
//!
//! Profiles (default, conservative, aggressive) tune the loop defaults and
//! the unwind step bound. `LOOPER_CONFIG` points at a TOML file that
//! replaces the profile entirely.

use serde::{Deserialize, Serialize};
use std::path::Path;

use anyhow::Context;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LooperConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Defaults applied when a loop request leaves a parameter out
    #[serde(default)]
    pub looping: LoopDefaults,

    /// Close behaviour
    #[serde(default)]
    pub unwind: UnwindConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Loop parameter defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDefaults {
    /// "variable" or "stable"
    #[serde(default = "default_rate_mode")]
    pub rate_mode: String,

    /// Borrow ratio in basis points
    #[serde(default = "default_borrow_ratio")]
    pub borrow_ratio_bps: u16,

    /// Deposit rounds, principal included
    #[serde(default = "default_iteration_count")]
    pub iteration_count: u32,
}

fn default_rate_mode() -> String {
    "variable".to_string()
}
fn default_borrow_ratio() -> u16 {
    7500
}
fn default_iteration_count() -> u32 {
    10
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self {
            rate_mode: default_rate_mode(),
            borrow_ratio_bps: default_borrow_ratio(),
            iteration_count: default_iteration_count(),
        }
    }
}

/// Unwind configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnwindConfig {
    /// Withdraw/repay rounds before a close gives up
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_max_steps() -> u32 {
    100
}

impl Default for UnwindConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            looping: LoopDefaults::default(),
            unwind: UnwindConfig::default(),
        }
    }
}

impl LooperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    }

    /// Shallow loops well inside the LTV.
    pub fn conservative() -> Self {
        Self {
            profile: "conservative".to_string(),
            looping: LoopDefaults {
                rate_mode: "variable".to_string(),
                borrow_ratio_bps: 5000,
                iteration_count: 5,
            },
            unwind: UnwindConfig { max_steps: 100 },
        }
    }

    /// Deep loops close to the LTV; needs more unwind rounds.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            looping: LoopDefaults {
                rate_mode: "variable".to_string(),
                borrow_ratio_bps: 8000,
                iteration_count: 25,
            },
            unwind: UnwindConfig { max_steps: 200 },
        }
    }

    /// Get profile from environment variable LOOPER_PROFILE, or default.
    /// Supported values: default, conservative, aggressive
    pub fn from_env() -> Self {
        let profile = std::env::var("LOOPER_PROFILE").unwrap_or_else(|_| "default".to_string());
        match profile.to_lowercase().as_str() {
            "conservative" | "safe" => Self::conservative(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// `LOOPER_CONFIG` file if set, otherwise the `LOOPER_PROFILE` profile.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var("LOOPER_CONFIG") {
            Ok(path) => Self::from_file(path),
            Err(_) => Ok(Self::from_env()),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Looper configuration loaded");
        tracing::info!(
            rate_mode = %self.looping.rate_mode,
            borrow_ratio_bps = self.looping.borrow_ratio_bps,
            iteration_count = self.looping.iteration_count,
            "Loop defaults"
        );
        tracing::info!(max_steps = self.unwind.max_steps, "Unwind bound");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LooperConfig::default();
        assert_eq!(config.profile, "default");
        assert_eq!(config.unwind.max_steps, 100);
        assert_eq!(config.looping.iteration_count, 10);
    }

    #[test]
    fn test_profiles() {
        let conservative = LooperConfig::conservative();
        let aggressive = LooperConfig::aggressive();
        assert!(conservative.looping.borrow_ratio_bps < aggressive.looping.borrow_ratio_bps);
        assert!(aggressive.unwind.max_steps > conservative.unwind.max_steps);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LooperConfig = toml::from_str(
            r#"
            profile = "custom"
            [unwind]
            max_steps = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.profile, "custom");
        assert_eq!(config.unwind.max_steps, 7);
        assert_eq!(config.looping.borrow_ratio_bps, 7500);
    }

    #[test]
    fn test_serialization() {
        let config = LooperConfig::aggressive();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"aggressive\""));

        let parsed: LooperConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.looping.iteration_count, 25);
    }
}
