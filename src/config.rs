use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::core::rule::Family;
use crate::utils::get_config_dir;

/// How the CLI prints results
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    #[strum(serialize = "text")]
    Text,
    #[strum(serialize = "json")]
    Json,
}

/// Persisted defaults for the command line tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub family: Family,
    #[serde(default)]
    pub format: OutputFormat,
    /// Record counter resets and commits in the audit log
    #[serde(default = "default_true")]
    pub audit: bool,
    /// Maximum tracing level: error, warn, info, debug or trace
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table: default_table(),
            family: Family::default(),
            format: OutputFormat::default(),
            audit: true,
            log_level: default_log_level(),
        }
    }
}

fn default_table() -> String {
    "filter".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Location of `config.json`, if the platform has a config directory.
pub fn config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config to the default location. See [`save_config_to`].
pub fn save_config(config: &Config) -> std::io::Result<()> {
    match config_path() {
        Some(path) => save_config_to(config, &path),
        None => Ok(()),
    }
}

/// Saves the config using an atomic write pattern.
/// 1. Writes to a temporary file next to the target.
/// 2. Sets restrictive permissions (0o600) before any data is written.
/// 3. Atomically renames to the target path.
pub fn save_config_to(config: &Config, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Loads the config from the default location, or defaults if not found.
pub fn load_config() -> Config {
    config_path()
        .map(|path| load_config_from(&path))
        .unwrap_or_default()
}

/// Loads the config from `path`; a missing or malformed file yields defaults.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(json) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match serde_json::from_str(&json) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring malformed config {}: {}", path.display(), e);
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.table, "filter");
        assert_eq!(config.family, Family::Ipv4);
        assert_eq!(config.format, OutputFormat::Text);
        assert!(config.audit);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"family": "ipv6"}"#).unwrap();
        assert_eq!(config.family, Family::Ipv6);
        assert_eq!(config.table, "filter");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            table: "mangle".to_string(),
            format: OutputFormat::Json,
            audit: false,
            ..Config::default()
        };

        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path), config);
        assert!(!path.with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_missing_or_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert_eq!(load_config_from(&path), Config::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_config_from(&path), Config::default());
    }

    #[test]
    fn test_output_format_names() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::Text.to_string(), "text");
    }
}
