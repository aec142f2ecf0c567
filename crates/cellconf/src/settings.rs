//! Setting sections. Every field carries a serde default so partial files work.

use serde::{Deserialize, Serialize};

/// RPC transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-call timeout in milliseconds for the stock service clients.
    /// Default: 10000
    #[serde(default = "RpcConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RpcConfig {
    fn default_timeout_ms() -> u64 {
        10_000
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Preview frame cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Maximum number of rendered frames kept in memory.
    /// Default: 10
    #[serde(default = "PreviewConfig::default_cache_capacity")]
    pub cache_capacity: usize,
}

impl PreviewConfig {
    fn default_cache_capacity() -> usize {
        10
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            cache_capacity: Self::default_cache_capacity(),
        }
    }
}

/// Settings for the loopback tone served by `cellplay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "AudioConfig::default_tone_hz")]
    pub tone_hz: f64,

    #[serde(default = "AudioConfig::default_tone_seconds")]
    pub tone_seconds: f64,

    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,
}

impl AudioConfig {
    fn default_tone_hz() -> f64 {
        440.0
    }

    fn default_tone_seconds() -> f64 {
        4.0
    }

    fn default_sample_rate() -> u32 {
        48_000
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            tone_hz: Self::default_tone_hz(),
            tone_seconds: Self::default_tone_seconds(),
            sample_rate: Self::default_sample_rate(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter directive for `tracing-subscriber`'s `EnvFilter`.
    /// Default: "info"
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
