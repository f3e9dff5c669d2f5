//! Engine configuration.
//!
//! A deliberately slimmed-down cousin of `aura_core::config`'s generic
//! `AuraConfig`/`ConfigLoader` derive-macro framework: this workspace has a
//! single configuration struct, so only the load/validate shape survives —
//! defaults, a `toml` loader, and a `validate()` that rejects nonsensical
//! combinations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level engine configuration, covering anti-entropy scheduling, the SWIM
/// failure detector, RTT estimation, and the out-of-order buffer's bounds.
/// See spec §6.4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gossip_interval_ms: u64,
    pub fanout: usize,
    pub max_push_entries: usize,
    pub max_message_bytes: usize,

    pub probe_interval_ms: u64,
    pub indirect_probe_count: usize,
    pub suspect_timeout_ms: u64,
    pub direct_probe_threshold: u32,

    pub rtt_min_sample_ms: u64,
    pub rtt_max_sample_ms: u64,
    pub rtt_initial_srtt_ms: u64,
    pub rtt_initial_var_ms: u64,

    pub max_buffer_per_author: usize,
    pub max_total_buffer: usize,

    pub max_clock_skew_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 5_000,
            fanout: 3,
            max_push_entries: 64,
            max_message_bytes: 32 * 1024,

            probe_interval_ms: 1_000,
            indirect_probe_count: 3,
            suspect_timeout_ms: 5_000,
            direct_probe_threshold: 1,

            rtt_min_sample_ms: 50,
            rtt_max_sample_ms: 30_000,
            rtt_initial_srtt_ms: 1_000,
            rtt_initial_var_ms: 500,

            max_buffer_per_author: 1_000,
            max_total_buffer: 10_000,

            max_clock_skew_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML document, falling back to defaults
    /// for any field the document omits.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject configuration values that cannot yield a working engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fanout == 0 {
            return Err(ConfigError::Invalid("fanout must be at least 1".into()));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_message_bytes must be positive".into(),
            ));
        }
        if self.rtt_min_sample_ms > self.rtt_max_sample_ms {
            return Err(ConfigError::Invalid(
                "rtt_min_sample_ms must not exceed rtt_max_sample_ms".into(),
            ));
        }
        if self.max_buffer_per_author == 0 || self.max_total_buffer == 0 {
            return Err(ConfigError::Invalid(
                "buffer caps must be positive".into(),
            ));
        }
        if self.max_buffer_per_author > self.max_total_buffer {
            return Err(ConfigError::Invalid(
                "max_buffer_per_author must not exceed max_total_buffer".into(),
            ));
        }
        Ok(())
    }
}
