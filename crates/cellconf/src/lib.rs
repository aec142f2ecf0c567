//! Minimal configuration loading for cellwire.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `~/.config/cellwire/config.toml` (user)
//! 2. `./cellwire.toml` (local override, or an explicit path)
//! 3. Environment variables (`CELLWIRE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [rpc]
//! timeout_ms = 10000
//!
//! [preview]
//! cache_capacity = 10
//!
//! [audio]
//! tone_hz = 440.0
//! tone_seconds = 4.0
//! sample_rate = 48000
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use settings::{AudioConfig, PreviewConfig, RpcConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete cellwire configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CellConfig {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub preview: PreviewConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl CellConfig {
    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CellConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Per-call timeout for the stock service clients.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# cellwire configuration\n\n");

        output.push_str("[rpc]\n");
        output.push_str(&format!("timeout_ms = {}\n", self.rpc.timeout_ms));

        output.push_str("\n[preview]\n");
        output.push_str(&format!(
            "cache_capacity = {}\n",
            self.preview.cache_capacity
        ));

        output.push_str("\n[audio]\n");
        output.push_str(&format!("tone_hz = {:?}\n", self.audio.tone_hz));
        output.push_str(&format!("tone_seconds = {:?}\n", self.audio.tone_seconds));
        output.push_str(&format!("sample_rate = {}\n", self.audio.sample_rate));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}
