//! Config file discovery, loading, and environment variable overlay.

use crate::{CellConfig, ConfigError, TelemetryConfig};
use crate::settings::{AudioConfig, PreviewConfig, RpcConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Only returns files that exist.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("cellwire/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("cellwire.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<CellConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<CellConfig, ConfigError> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge two configs, with non-default `overlay` values taking precedence.
pub fn merge_configs(base: CellConfig, overlay: CellConfig) -> CellConfig {
    let rpc_default = RpcConfig::default();
    let preview_default = PreviewConfig::default();
    let audio_default = AudioConfig::default();
    let telemetry_default = TelemetryConfig::default();

    CellConfig {
        rpc: RpcConfig {
            timeout_ms: if overlay.rpc.timeout_ms != rpc_default.timeout_ms {
                overlay.rpc.timeout_ms
            } else {
                base.rpc.timeout_ms
            },
        },
        preview: PreviewConfig {
            cache_capacity: if overlay.preview.cache_capacity != preview_default.cache_capacity {
                overlay.preview.cache_capacity
            } else {
                base.preview.cache_capacity
            },
        },
        audio: AudioConfig {
            tone_hz: if overlay.audio.tone_hz != audio_default.tone_hz {
                overlay.audio.tone_hz
            } else {
                base.audio.tone_hz
            },
            tone_seconds: if overlay.audio.tone_seconds != audio_default.tone_seconds {
                overlay.audio.tone_seconds
            } else {
                base.audio.tone_seconds
            },
            sample_rate: if overlay.audio.sample_rate != audio_default.sample_rate {
                overlay.audio.sample_rate
            } else {
                base.audio.sample_rate
            },
        },
        telemetry: TelemetryConfig {
            log_level: if overlay.telemetry.log_level != telemetry_default.log_level {
                overlay.telemetry.log_level
            } else {
                base.telemetry.log_level
            },
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut CellConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
pub fn apply_overrides_from<F>(config: &mut CellConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CELLWIRE_RPC_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.rpc.timeout_ms = ms;
            sources.env_overrides.push("CELLWIRE_RPC_TIMEOUT_MS".to_string());
        }
    }

    if let Some(v) = lookup("CELLWIRE_CACHE_CAPACITY") {
        if let Ok(capacity) = v.parse() {
            config.preview.cache_capacity = capacity;
            sources.env_overrides.push("CELLWIRE_CACHE_CAPACITY".to_string());
        }
    }

    if let Some(v) = lookup("CELLWIRE_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("CELLWIRE_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[rpc]
timeout_ms = 500
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.rpc.timeout_ms, 500);
        // Other values should be defaults
        assert_eq!(config.preview.cache_capacity, 10);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        let err = parse_toml("[rpc]\ntimeout_ms = \"soon\"\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_file_and_merge() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[preview]\ncache_capacity = 32\n\n[telemetry]\nlog_level = \"debug\"").unwrap();

        let mut base = CellConfig::default();
        base.rpc.timeout_ms = 1234;

        let overlay = load_from_file(file.path()).unwrap();
        let merged = merge_configs(base, overlay);

        assert_eq!(merged.rpc.timeout_ms, 1234);
        assert_eq!(merged.preview.cache_capacity, 32);
        assert_eq!(merged.telemetry.log_level, "debug");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_from_file(Path::new("/definitely/not/here/cellwire.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CELLWIRE_RPC_TIMEOUT_MS", "750"),
            ("CELLWIRE_CACHE_CAPACITY", "not-a-number"),
            ("CELLWIRE_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = CellConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.rpc.timeout_ms, 750);
        assert_eq!(config.preview.cache_capacity, 10);
        assert_eq!(config.telemetry.log_level, "trace");
        assert_eq!(
            sources.env_overrides,
            vec!["CELLWIRE_RPC_TIMEOUT_MS".to_string(), "CELLWIRE_LOG_LEVEL".to_string()]
        );
    }

    #[test]
    fn test_explicit_path_wins_over_local() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let files = discover_config_files_with_override(Some(file.path()));
        assert_eq!(files.last().map(PathBuf::as_path), Some(file.path()));
    }
}
