//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILFTS_CONFIG` (environment variable)
//! 2. `~/.config/mailfts/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailfts\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::index::store::default_index_path;
use crate::worker::{RetryPolicy, WorkerOptions, DEFAULT_BATCH_SIZE, DEFAULT_SETTLE_DELAY};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Index location and worker tuning.
    pub index: IndexConfig,
    /// Feature switch and entitlement.
    pub features: FeaturesConfig,
    /// Retry behavior of the background job.
    pub scheduler: SchedulerConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for indexes and logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Index location and worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index file; defaults to a per-root file in the cache directory.
    pub path: Option<PathBuf>,
    /// Messages marked indexed per catalog write.
    pub batch_size: usize,
    /// Delay before a non-immediate run starts.
    pub settle_delay_secs: u64,
    /// Checkpoint the index WAL after each run.
    pub checkpoints: bool,
    /// Run the indexer at lowered scheduling priority.
    pub background_priority: bool,
}

/// Feature switch and entitlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Full-text indexing enabled.
    pub fts: bool,
    /// Full-text search is licensed.
    pub entitled: bool,
}

/// Retry behavior of the background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further one.
    pub retry_backoff_secs: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: None,
            batch_size: DEFAULT_BATCH_SIZE,
            settle_delay_secs: DEFAULT_SETTLE_DELAY.as_secs(),
            checkpoints: true,
            background_priority: true,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            fts: true,
            entitled: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            retry_backoff_secs: policy.backoff.as_secs(),
        }
    }
}

impl IndexConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            batch_size: self.batch_size.max(1),
            checkpoint: self.checkpoints,
            background_priority: self.background_priority,
        }
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_secs(self.retry_backoff_secs),
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load configuration from `path`, falling back to defaults on any error.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILFTS_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailfts").join("config.toml"))
}

/// Return the cache directory for indexes, logs, etc.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailfts")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailfts.log")
}

/// Return the index file for the mail tree at `root`.
pub fn index_path(config: &Config, root: &Path) -> PathBuf {
    match config.index.path {
        Some(ref path) => path.clone(),
        None => default_index_path(&cache_dir(config), root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.index.batch_size, 100);
        assert_eq!(cfg.index.settle_delay(), Duration::from_secs(30));
        assert!(cfg.features.fts && cfg.features.entitled);
        assert_eq!(cfg.scheduler.max_retries, 3);
        assert_eq!(cfg.scheduler.retry_backoff_secs, 30);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut cfg = Config::default();
        cfg.index.path = Some(PathBuf::from("/tmp/fts.db"));
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.index.path, cfg.index.path);
        assert_eq!(parsed.index.batch_size, cfg.index.batch_size);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[index]
batch_size = 25

[features]
fts = false
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.index.batch_size, 25);
        assert!(!cfg.features.fts);
        // Other fields use defaults
        assert!(cfg.features.entitled);
        assert!(cfg.index.checkpoints);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_load_config_from_bad_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[index\nbatch_size = ").unwrap();
        assert_eq!(load_config_from(&path).index.batch_size, 100);

        std::fs::write(&path, "[scheduler]\nmax_retries = 7\n").unwrap();
        assert_eq!(load_config_from(&path).scheduler.retry_policy().max_retries, 7);
    }

    #[test]
    fn test_worker_options_clamp_batch_size() {
        let cfg: Config = toml::from_str("[index]\nbatch_size = 0\ncheckpoints = false\n").unwrap();
        let options = cfg.index.worker_options();
        assert_eq!(options.batch_size, 1);
        assert!(!options.checkpoint);
    }

    #[test]
    fn test_index_path_override_and_default() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/cache"));
        let default = index_path(&cfg, Path::new("/mail"));
        assert!(default.starts_with("/cache"));
        assert!(default.to_string_lossy().ends_with(".fts.db"));

        cfg.index.path = Some(PathBuf::from("/elsewhere/fts.db"));
        assert_eq!(index_path(&cfg, Path::new("/mail")), PathBuf::from("/elsewhere/fts.db"));
        assert_eq!(log_file_path(&cfg), PathBuf::from("/cache/mailfts.log"));
    }
}
