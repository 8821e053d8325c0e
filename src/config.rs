//! Engine configuration.

use crate::error::{EngineError, EngineResult};
use std::path::PathBuf;
use std::time::Duration;

/// Recognized engine options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem path containing `wal.log` and `snapshot.json`.
    pub data_dir: PathBuf,
    /// Width of the recent ranking window in seconds. Must be > 0.
    pub recent_window_seconds: u64,
    /// Group-commit flush interval for the WAL.
    pub wal_group_commit_interval: Duration,
    /// Group-commit batch size for the WAL. Must be > 0.
    pub wal_group_commit_batch: usize,
    /// When true, every append is flushed and fsynced on its own
    /// (an effective batch size of 1).
    pub wal_sync_every_write: bool,
    /// Interval between snapshots (each followed by a WAL rotation).
    pub snapshot_interval: Duration,
    /// Ranking size used when a query asks for `k == 0`. Must be > 0.
    pub topk_default: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            recent_window_seconds: 600,
            wal_group_commit_interval: Duration::from_millis(10),
            wal_group_commit_batch: 256,
            wal_sync_every_write: false,
            snapshot_interval: Duration::from_secs(60),
            topk_default: 100,
        }
    }
}

impl Config {
    /// Validate option values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.recent_window_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "recent_window_seconds must be > 0".into(),
            ));
        }
        if self.wal_group_commit_batch == 0 {
            return Err(EngineError::InvalidConfig(
                "wal_group_commit_batch must be > 0".into(),
            ));
        }
        if self.wal_group_commit_interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "wal_group_commit_interval must be nonzero".into(),
            ));
        }
        if self.snapshot_interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "snapshot_interval must be nonzero".into(),
            ));
        }
        if self.topk_default == 0 {
            return Err(EngineError::InvalidConfig(
                "topk_default must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// The WAL batch size after applying `wal_sync_every_write`.
    pub fn effective_wal_batch(&self) -> usize {
        if self.wal_sync_every_write {
            1
        } else {
            self.wal_group_commit_batch
        }
    }

    /// Load configuration from the environment, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            data_dir: env_or("DATA_DIR", d.data_dir.to_string_lossy().as_ref()).into(),
            recent_window_seconds: env_parse("RECENT_WINDOW_SECONDS", d.recent_window_seconds),
            wal_group_commit_interval: Duration::from_millis(env_parse(
                "WAL_GROUP_COMMIT_INTERVAL_MS",
                d.wal_group_commit_interval.as_millis() as u64,
            )),
            wal_group_commit_batch: env_parse(
                "WAL_GROUP_COMMIT_BATCH",
                d.wal_group_commit_batch as u64,
            ) as usize,
            wal_sync_every_write: env_flag("WAL_SYNC_EVERY_WRITE", d.wal_sync_every_write),
            snapshot_interval: Duration::from_secs(env_parse(
                "SNAPSHOT_INTERVAL_SECS",
                d.snapshot_interval.as_secs(),
            )),
            topk_default: env_parse("TOPK_DEFAULT", d.topk_default as u64) as usize,
        }
    }
}

fn env_or(key: &str, def: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => def.to_string(),
    }
}

fn env_parse(key: &str, def: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(def)
}

fn env_flag(key: &str, def: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => def,
    }
}
