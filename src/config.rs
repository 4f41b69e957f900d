//! Configuration file for ~/.config/gator/config.toml.
//!
//! The file is optional. A missing or empty file yields `Config::default()`,
//! and any subset of keys may be given. `login` rewrites the file to record
//! the current user, so unlike most config files this one is also saved.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::aggregator::{AggregatorSettings, SettingsError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid aggregation settings: {0}")]
    Invalid(#[from] SettingsError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level configuration. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `gator.db` next to the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// User that `login` last selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,

    /// Seconds between aggregation ticks.
    pub fetch_interval_secs: u64,

    /// Bound on a single feed fetch, in seconds.
    pub fetch_timeout_secs: u64,

    /// Concurrent aggregation workers.
    pub workers: usize,

    /// User-Agent header sent with every fetch.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            current_user_name: None,
            fetch_interval_secs: 60,
            fetch_timeout_secs: 5,
            workers: 1,
            user_agent: concat!("gator/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "db_path",
        "current_user_name",
        "fetch_interval_secs",
        "fetch_timeout_secs",
        "workers",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration to `path`, replacing any existing file.
    ///
    /// Writes a uniquely named temp file in the same directory, syncs it,
    /// then renames it over `path`, so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        use std::time::{SystemTime, UNIX_EPOCH};
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = path.with_extension(format!("tmp.{:016x}", suffix));

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let written = options.open(&temp_path).and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| std::fs::rename(&temp_path, path)) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(ConfigError::Io(e));
        }

        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Database location, resolving the default against `config_dir`.
    pub fn db_path_in(&self, config_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir.join("gator.db"))
    }

    /// Validated aggregation loop settings.
    pub fn aggregator_settings(&self) -> Result<AggregatorSettings, ConfigError> {
        Ok(AggregatorSettings::new(
            Duration::from_secs(self.fetch_interval_secs),
            Duration::from_secs(self.fetch_timeout_secs),
            self.workers,
        )?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch_interval_secs, 60);
        assert_eq!(config.fetch_timeout_secs, 5);
        assert_eq!(config.workers, 1);
        assert!(config.current_user_name.is_none());
        assert!(config.user_agent.starts_with("gator/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_and_whitespace_files_return_default() {
        let (_dir, path) = write_config("");
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        let (_dir, path) = write_config("   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("current_user_name = \"kahya\"\nworkers = 4\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.current_user_name.as_deref(), Some("kahya"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.fetch_interval_secs, 60);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("workers = \"many\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("workers = 2\ntotally_fake_key = true\n");
        assert_eq!(Config::load(&path).unwrap().workers, 2);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            current_user_name: Some("lane".to_string()),
            db_path: Some(PathBuf::from("/var/lib/gator/gator.db")),
            fetch_interval_secs: 30,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);

        // Overwrite in place, no temp files left behind
        let relogged = Config {
            current_user_name: Some("holgith".to_string()),
            ..config
        };
        relogged.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), relogged);
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_db_path_default_is_in_config_dir() {
        let config = Config::default();
        assert_eq!(
            config.db_path_in(Path::new("/home/u/.config/gator")),
            PathBuf::from("/home/u/.config/gator/gator.db")
        );
    }

    #[test]
    fn test_aggregator_settings_validation() {
        let settings = Config::default().aggregator_settings().unwrap();
        assert_eq!(settings.interval(), Duration::from_secs(60));
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(5));

        let zero = Config {
            fetch_interval_secs: 0,
            ..Config::default()
        };
        assert!(matches!(
            zero.aggregator_settings(),
            Err(ConfigError::Invalid(SettingsError::ZeroInterval))
        ));

        let too_many = Config {
            workers: 100,
            ..Config::default()
        };
        assert!(matches!(
            too_many.aggregator_settings(),
            Err(ConfigError::Invalid(SettingsError::WorkerCount(100)))
        ));
    }
}
