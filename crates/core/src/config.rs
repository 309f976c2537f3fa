//! TOML-based configuration for keybranch.
//!
//! A handful of deployment-specific values may be overridden from the
//! environment via [`AppConfig::apply_env_overrides`], which keeps container
//! deployments from having to template the config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use crate::errors::ConfigError;

/// Upper bound for `merge.batch_size`.
pub const MAX_BATCH_SIZE: usize = 10_000;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Listener / logging / data directory settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Diff / merge / fork tuning.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Branch defaults.
    #[serde(default)]
    pub branches: BranchesConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the database lives here).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// When set, logs are also written to daily-rotated files in this directory.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/keybranch")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            log_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file name inside `server.data_dir`.
    #[serde(default = "default_db_file")]
    pub file_name: String,

    /// How long a writer waits for another connection's write lock.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_file() -> String {
    "keybranch.db".into()
}
fn default_busy_timeout() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: default_db_file(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeConfig {
    /// Rows per read page and per write chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum resolutions accepted in one merge request.
    #[serde(default = "default_max_resolutions")]
    pub max_resolutions: usize,
}

fn default_batch_size() -> usize {
    500
}
fn default_max_resolutions() -> usize {
    10_000
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_resolutions: default_max_resolutions(),
        }
    }
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchesConfig {
    /// Name of the default branch created with every space.
    #[serde(default = "default_branch_name")]
    pub default_name: String,
}

fn default_branch_name() -> String {
    "main".into()
}

impl Default for BranchesConfig {
    fn default() -> Self {
        Self {
            default_name: default_branch_name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply `KEYBRANCH_LISTEN`, `KEYBRANCH_LOG_LEVEL` and `KEYBRANCH_DATA_DIR`
    /// on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(listen) = read_env_override("KEYBRANCH_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(level) = read_env_override("KEYBRANCH_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(dir) = read_env_override("KEYBRANCH_DATA_DIR") {
            self.server.data_dir = PathBuf::from(dir);
        }
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.listen".into(),
                detail: "listen address must not be empty".into(),
            });
        }
        if self.database.file_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database.file_name".into(),
                detail: "database file name must not be empty".into(),
            });
        }
        if self.merge.batch_size == 0 || self.merge.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "merge.batch_size".into(),
                detail: format!("batch size must be between 1 and {}", MAX_BATCH_SIZE),
            });
        }
        if self.merge.max_resolutions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "merge.max_resolutions".into(),
                detail: "max resolutions must be > 0".into(),
            });
        }
        if self.branches.default_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "branches.default_name".into(),
                detail: "default branch name must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, apply env overrides, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.server.data_dir.join(&self.database.file_name)
    }
}

fn read_env_override(env_name: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(env_name, "applied env override");
            Some(val)
        }
        Ok(_) => {
            warn!(env_name, "env override is set but empty, ignoring");
            None
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[server]
listen = "0.0.0.0:8080"
log_level = "debug"
data_dir = "/tmp/keybranch"

[database]
file_name = "kb.db"
busy_timeout_ms = 2000

[merge]
batch_size = 250
max_resolutions = 500

[branches]
default_name = "trunk"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.database.busy_timeout_ms, 2000);
        assert_eq!(config.merge.batch_size, 250);
        assert_eq!(config.branches.default_name, "trunk");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/keybranch/kb.db"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.server.log_level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/keybranch.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.merge.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.batch_size"
        ));
    }

    #[test]
    fn test_validate_rejects_blank_default_branch() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.branches.default_name = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "branches.default_name"
        ));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("KEYBRANCH_DATA_DIR", "/srv/keybranch");
        std::env::set_var("KEYBRANCH_LOG_LEVEL", "");

        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.apply_env_overrides();
        assert_eq!(config.server.data_dir, PathBuf::from("/srv/keybranch"));
        // Empty values are ignored.
        assert_eq!(config.server.log_level, "debug");

        std::env::remove_var("KEYBRANCH_DATA_DIR");
        std::env::remove_var("KEYBRANCH_LOG_LEVEL");
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:3000");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.database.file_name, "keybranch.db");
        assert_eq!(config.merge.batch_size, 500);
        assert_eq!(config.branches.default_name, "main");
        assert!(config.validate().is_ok());
    }
}
