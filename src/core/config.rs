//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{QbjError, Result};

/// Full janitor configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cleanup: CleanupConfig,
    pub snapshot: SnapshotConfig,
    pub paths: PathsConfig,
}

/// Question bank store location and connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

/// Defaults for the detect-and-delete step. CLI flags override these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanupConfig {
    /// Global deletion budget per run.
    pub max_deletions: usize,
    /// Maximum number of duplicate fingerprints processed per run.
    pub max_fingerprints: usize,
    pub dry_run: bool,
    /// Also shield questions whose category a random-set slot draws from.
    pub respect_random_sets: bool,
    /// Emit a "deleted so far" progress line every N deletions.
    pub progress_every: usize,
}

/// Retention of persisted protected-category snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotConfig {
    pub retain: usize,
}

/// Filesystem paths used by qbj.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Directory for pipeline transcripts.
    pub log_dir: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("question_bank.sqlite3"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_deletions: 2_000,
            max_fingerprints: 200,
            dry_run: true,
            respect_random_sets: false,
            progress_every: 200,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { retain: 5 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            config_file: home_dir().join(".config").join("qbj").join("config.toml"),
            log_dir: data.join("logs"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[QBJ-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("qbj")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| QbjError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(QbjError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("QBJ_DATABASE_PATH") {
            self.database.path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("QBJ_DATABASE_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_env("QBJ_DATABASE_BUSY_TIMEOUT_MS", &raw)?;
        }

        if let Some(raw) = lookup("QBJ_CLEANUP_MAX_DELETIONS") {
            self.cleanup.max_deletions = parse_env("QBJ_CLEANUP_MAX_DELETIONS", &raw)?;
        }
        if let Some(raw) = lookup("QBJ_CLEANUP_MAX_FINGERPRINTS") {
            self.cleanup.max_fingerprints = parse_env("QBJ_CLEANUP_MAX_FINGERPRINTS", &raw)?;
        }
        if let Some(raw) = lookup("QBJ_CLEANUP_DRY_RUN") {
            self.cleanup.dry_run = parse_env_bool("QBJ_CLEANUP_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("QBJ_CLEANUP_RESPECT_RANDOM_SETS") {
            self.cleanup.respect_random_sets =
                parse_env_bool("QBJ_CLEANUP_RESPECT_RANDOM_SETS", &raw)?;
        }
        if let Some(raw) = lookup("QBJ_CLEANUP_PROGRESS_EVERY") {
            self.cleanup.progress_every = parse_env("QBJ_CLEANUP_PROGRESS_EVERY", &raw)?;
        }

        if let Some(raw) = lookup("QBJ_SNAPSHOT_RETAIN") {
            self.snapshot.retain = parse_env("QBJ_SNAPSHOT_RETAIN", &raw)?;
        }

        if let Some(raw) = lookup("QBJ_PATHS_LOG_DIR") {
            self.paths.log_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("QBJ_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("cleanup.max_deletions", self.cleanup.max_deletions),
            ("cleanup.max_fingerprints", self.cleanup.max_fingerprints),
            ("cleanup.progress_every", self.cleanup.progress_every),
            ("snapshot.retain", self.snapshot.retain),
        ] {
            if val == 0 {
                return Err(QbjError::InvalidConfig {
                    details: format!("{name} must be >= 1"),
                });
            }
        }

        if self.database.path.as_os_str().is_empty() {
            return Err(QbjError::InvalidConfig {
                details: "database.path must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| QbjError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

/// Accepts `true`/`false` as well as the `1`/`0` convention of the host CLI.
fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => parse_env(name, other),
    }
}
