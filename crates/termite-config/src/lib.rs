//! # termite-config
//!
//! Configuration for Termite components, loaded from:
//! 1. `~/.termite/config.toml` (global)
//! 2. `.termite/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Load config from the standard locations relative to the current
    /// directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for_dir(Path::new("."))
    }

    /// Resolution order: global → project → env vars.
    pub fn load_for_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global) = Self::global_config_path() {
            if global.exists() {
                debug!(path = %global.display(), "loading global config");
                config = toml::from_str(&std::fs::read_to_string(&global)?)?;
            }
        }

        let project = dir.join(".termite/config.toml");
        if project.exists() {
            debug!(path = %project.display(), "loading project config");
            let overlay: Config = toml::from_str(&std::fs::read_to_string(&project)?)?;
            config.merge(overlay);
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Global config path: `~/.termite/config.toml`.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".termite/config.toml"))
    }

    /// Non-default values from `other` replace values in `self`.
    fn merge(&mut self, other: Config) {
        let default_worker = WorkerConfig::default();
        if other.worker.port != default_worker.port {
            self.worker.port = other.worker.port;
        }
        if other.worker.jobs != default_worker.jobs {
            self.worker.jobs = other.worker.jobs;
        }
        if other.worker.coordinator != default_worker.coordinator {
            self.worker.coordinator = other.worker.coordinator;
        }
        if !other.worker.local_roots.is_empty() {
            self.worker.local_roots = other.worker.local_roots;
        }

        let default_storage = StorageConfig::default();
        if other.storage.cache_dir != default_storage.cache_dir {
            self.storage.cache_dir = other.storage.cache_dir;
        }
        if other.storage.tmp_dir != default_storage.tmp_dir {
            self.storage.tmp_dir = other.storage.tmp_dir;
        }

        let default_auth = AuthConfig::default();
        if other.auth.secret_file != default_auth.secret_file {
            self.auth.secret_file = other.auth.secret_file;
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("TERMITE_PORT") {
            if let Ok(port) = port.parse() {
                self.worker.port = port;
            }
        }
        if let Ok(jobs) = std::env::var("TERMITE_JOBS") {
            if let Ok(jobs) = jobs.parse() {
                self.worker.jobs = jobs;
            }
        }
        if let Ok(coordinator) = std::env::var("TERMITE_COORDINATOR") {
            self.worker.coordinator = coordinator;
        }
        if let Ok(dir) = std::env::var("TERMITE_CACHE_DIR") {
            self.storage.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("TERMITE_TMP_DIR") {
            self.storage.tmp_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("TERMITE_SECRET_FILE") {
            self.auth.secret_file = PathBuf::from(file);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// TCP port the worker daemon listens on.
    pub port: u16,
    /// Maximum concurrent jobs across all mirrors.
    pub jobs: usize,
    /// Coordinator address; empty disables reporting.
    pub coordinator: String,
    /// Roots assumed shared with the master host.
    pub local_roots: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            port: 1235,
            jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            coordinator: String::new(),
            local_roots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Content cache directory.
    pub cache_dir: PathBuf,
    /// Scratch directory for running jobs.
    pub tmp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        StorageConfig {
            cache_dir: home.join(".termite/cache"),
            tmp_dir: PathBuf::from("/tmp/termite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// File holding the cluster's shared secret.
    pub secret_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        AuthConfig { secret_file: home.join(".termite/secret") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Serialize tests that touch process environment.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.worker.port, 1235);
        assert!(config.worker.jobs >= 1);
        assert!(config.worker.coordinator.is_empty());
        assert!(config.storage.cache_dir.ends_with(".termite/cache"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[worker]
jobs = 12
"#,
        )
        .unwrap();
        assert_eq!(config.worker.jobs, 12);
        assert_eq!(config.worker.port, 1235);
        assert_eq!(config.auth.secret_file, AuthConfig::default().secret_file);
    }

    #[test]
    fn project_config_overrides_global() {
        let mut base = Config::default();
        let overlay: Config = toml::from_str(
            r#"
[worker]
port = 9999

[storage]
tmp_dir = "/scratch/termite"
"#,
        )
        .unwrap();
        base.merge(overlay);
        assert_eq!(base.worker.port, 9999);
        assert_eq!(base.storage.tmp_dir, PathBuf::from("/scratch/termite"));
        // Untouched sections keep their values.
        assert_eq!(base.worker.jobs, WorkerConfig::default().jobs);
    }

    #[test]
    fn merge_keeps_base_local_roots_when_overlay_empty() {
        let mut base = Config::default();
        base.worker.local_roots = vec!["/usr".into()];
        base.merge(Config::default());
        assert_eq!(base.worker.local_roots, vec!["/usr".to_string()]);
    }

    #[test]
    fn env_overrides_win() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();

        std::env::set_var("TERMITE_PORT", "4321");
        std::env::set_var("TERMITE_CACHE_DIR", "/elsewhere/cache");
        config.apply_env_overrides();
        std::env::remove_var("TERMITE_PORT");
        std::env::remove_var("TERMITE_CACHE_DIR");

        assert_eq!(config.worker.port, 4321);
        assert_eq!(config.storage.cache_dir, PathBuf::from("/elsewhere/cache"));
    }

    #[test]
    fn invalid_env_numbers_are_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();

        std::env::set_var("TERMITE_JOBS", "lots");
        config.apply_env_overrides();
        std::env::remove_var("TERMITE_JOBS");

        assert_eq!(config.worker.jobs, WorkerConfig::default().jobs);
    }

    #[test]
    fn load_for_dir_reads_project_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join(".termite")).unwrap();
        std::fs::write(
            temp.path().join(".termite/config.toml"),
            "[worker]\nport = 7777\n",
        )
        .unwrap();

        let config = Config::load_for_dir(temp.path()).unwrap();
        assert_eq!(config.worker.port, 7777);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let result: Result<Config, _> = toml::from_str("worker { port = }");
        assert!(result.is_err());
    }
}
