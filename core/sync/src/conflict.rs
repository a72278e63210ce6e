//! Conflict resolution.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info};

use vaultsync_common::{Error, VaultPath};

use crate::protocol::{FileChange, SyncAction};

/// Directory under the vault root that receives conflict backups.
pub const DEFAULT_BACKUP_DIR: &str = ".sync_backups";

/// Conflict resolution strategy, applied to every conflict in a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Whichever side has the newer mtime; local wins ties.
    #[default]
    NewestWins,
    /// Always keep the local version.
    LocalWins,
    /// Always take the remote version.
    RemoteWins,
    /// Leave the conflict for an operator.
    Manual,
    /// Copy the local file aside, then take the remote version.
    BackupBoth,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::NewestWins => "newest_wins",
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::RemoteWins => "remote_wins",
            ConflictStrategy::Manual => "manual",
            ConflictStrategy::BackupBoth => "backup_both",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest_wins" => Ok(ConflictStrategy::NewestWins),
            "local_wins" => Ok(ConflictStrategy::LocalWins),
            "remote_wins" => Ok(ConflictStrategy::RemoteWins),
            "manual" => Ok(ConflictStrategy::Manual),
            "backup_both" => Ok(ConflictStrategy::BackupBoth),
            other => Err(Error::Config(format!("Unknown conflict strategy: {}", other))),
        }
    }
}

/// What the sync client should do with a conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    UseLocal,
    UseRemote,
    Skip,
}

/// Result of conflict resolution.
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    pub change: FileChange,
    pub action: ResolutionAction,
    /// Copy of the local file taken before the remote version is applied.
    pub backup_path: Option<PathBuf>,
    pub message: String,
}

impl ConflictResolution {
    fn new(change: &FileChange, action: ResolutionAction, message: impl Into<String>) -> Self {
        Self {
            change: change.clone(),
            action,
            backup_path: None,
            message: message.into(),
        }
    }
}

/// Decides a winner for each conflicting change.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    vault_dir: PathBuf,
    strategy: ConflictStrategy,
    backup_dir: PathBuf,
}

impl ConflictResolver {
    /// Create a resolver that backs up into `<vault>/.sync_backups`.
    pub fn new(vault_dir: impl Into<PathBuf>, strategy: ConflictStrategy) -> Self {
        let vault_dir = vault_dir.into();
        let backup_dir = vault_dir.join(DEFAULT_BACKUP_DIR);
        Self {
            vault_dir,
            strategy,
            backup_dir,
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Resolve a single conflict with the configured strategy.
    ///
    /// Only [`ConflictStrategy::BackupBoth`] touches the filesystem. If its
    /// backup copy fails the conflict is left unresolved rather than letting
    /// the remote version overwrite an unsaved local file.
    pub fn resolve(&self, change: &FileChange) -> ConflictResolution {
        if change.action() != SyncAction::Conflict {
            return ConflictResolution::new(change, ResolutionAction::Skip, "Not a conflict");
        }

        match self.strategy {
            ConflictStrategy::NewestWins => {
                let local_mtime = change.local_info().map(|i| i.mtime).unwrap_or(0.0);
                let remote_mtime = change.remote_info().map(|i| i.mtime).unwrap_or(0.0);
                if local_mtime >= remote_mtime {
                    ConflictResolution::new(
                        change,
                        ResolutionAction::UseLocal,
                        format!("Local is newer ({} >= {})", local_mtime, remote_mtime),
                    )
                } else {
                    ConflictResolution::new(
                        change,
                        ResolutionAction::UseRemote,
                        format!("Remote is newer ({} > {})", remote_mtime, local_mtime),
                    )
                }
            }
            ConflictStrategy::LocalWins => {
                ConflictResolution::new(change, ResolutionAction::UseLocal, "Local wins strategy")
            }
            ConflictStrategy::RemoteWins => {
                ConflictResolution::new(change, ResolutionAction::UseRemote, "Remote wins strategy")
            }
            ConflictStrategy::BackupBoth => match self.create_backup(change.path()) {
                Ok(Some(backup_path)) => {
                    let message = format!("Backed up local to {}", backup_path.display());
                    ConflictResolution {
                        backup_path: Some(backup_path),
                        ..ConflictResolution::new(change, ResolutionAction::UseRemote, message)
                    }
                }
                Ok(None) => ConflictResolution::new(
                    change,
                    ResolutionAction::UseRemote,
                    "No local file to back up",
                ),
                Err(e) => {
                    error!("Failed to back up {}: {}", change.path(), e);
                    ConflictResolution::new(
                        change,
                        ResolutionAction::Skip,
                        format!("Backup failed, left for manual resolution: {}", e),
                    )
                }
            },
            ConflictStrategy::Manual => {
                ConflictResolution::new(change, ResolutionAction::Skip, "Marked for manual resolution")
            }
        }
    }

    /// Resolve every conflict independently.
    pub fn resolve_all(&self, conflicts: &[FileChange]) -> Vec<ConflictResolution> {
        conflicts.iter().map(|c| self.resolve(c)).collect()
    }

    /// Backup location for a path, e.g. `notes/report.md` ->
    /// `.sync_backups/report_20240115_123456.md`.
    ///
    /// Two backups of same-named files within one second share a name; the
    /// later copy replaces the earlier one.
    pub fn backup_path_for(&self, path: &VaultPath) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        self.backup_dir
            .join(format!("{}_{}{}", path.stem(), timestamp, path.suffix()))
    }

    fn create_backup(&self, path: &VaultPath) -> std::io::Result<Option<PathBuf>> {
        let source = path.to_fs_path(&self.vault_dir);
        if !source.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)?;
        let backup_path = self.backup_path_for(path);
        fs::copy(&source, &backup_path)?;
        info!("Created backup: {} -> {}", source.display(), backup_path.display());
        Ok(Some(backup_path))
    }
}
