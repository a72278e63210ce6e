//! Sync settings read from the `sync` section of the vault configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vaultsync_common::{Error, Result};

use crate::conflict::ConflictStrategy;
use crate::retry::RetryConfig;

/// When sync cycles run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only when an operator asks.
    #[default]
    Manual,
    /// Also on a fixed interval.
    Auto,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Manual => f.write_str("manual"),
            SyncMode::Auto => f.write_str("auto"),
        }
    }
}

fn default_sync_dirs() -> Vec<String> {
    ["config", "library", "notes", "reference"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    ["*.log", "*.tmp", "models/*", "state/*"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_manifest_path() -> String {
    "state/sync_manifest.json".to_string()
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_upload_timeout() -> u64 {
    60
}

fn default_auto_interval() -> u64 {
    300
}

/// Settings for sync operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub enabled: bool,
    /// This node's name in sync requests.
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    /// Vault-relative directories to scan.
    #[serde(default = "default_sync_dirs")]
    pub sync_dirs: Vec<String>,
    /// Globs matched against the relative path and the bare file name.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// Vault-relative location of the baseline manifest.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
    /// Vault-relative backup directory; `.sync_backups` when unset.
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    /// Retries per request on transient failures. Zero keeps one attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Leave paths with unresolved conflicts out of the persisted baseline.
    #[serde(default)]
    pub exclude_pending_from_baseline: bool,
    /// Seconds between cycles in auto mode.
    #[serde(default = "default_auto_interval")]
    pub auto_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: String::new(),
            mode: SyncMode::default(),
            server_url: String::new(),
            conflict_strategy: ConflictStrategy::default(),
            sync_dirs: default_sync_dirs(),
            exclude_patterns: default_exclude_patterns(),
            manifest_path: default_manifest_path(),
            backup_dir: None,
            exchange_timeout_secs: default_exchange_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            max_retries: 0,
            exclude_pending_from_baseline: false,
            auto_interval_secs: default_auto_interval(),
        }
    }
}

impl SyncSettings {
    /// Read the `sync` object of a merged configuration document.
    ///
    /// A missing or null section yields the defaults. Unknown strategy or
    /// mode names are configuration errors.
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        match config.get("sync") {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(section) => serde_json::from_value(section.clone())
                .map_err(|e| Error::Config(format!("Invalid sync configuration: {}", e))),
        }
    }

    pub fn manifest_path(&self, vault_dir: &Path) -> PathBuf {
        vault_dir.join(&self.manifest_path)
    }

    pub fn backup_dir(&self, vault_dir: &Path) -> Option<PathBuf> {
        self.backup_dir.as_ref().map(|dir| vault_dir.join(dir))
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn auto_interval(&self) -> Duration {
        Duration::from_secs(self.auto_interval_secs.max(1))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
    }
}

/// Load a JSON configuration document from disk.
pub fn load_config_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}
