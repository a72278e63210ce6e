//! Status and health reporting for the sync subsystem.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use vaultsync_common::Result;

use crate::client::SyncClient;
use crate::settings::{SyncMode, SyncSettings};
use crate::transport::SyncTransport;

/// Summary of the sync configuration and the last persisted baseline.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusReport {
    pub enabled: bool,
    pub mode: SyncMode,
    pub server_url: String,
    pub node_id: String,
    /// Creation time of the baseline, RFC 3339.
    pub last_sync: Option<String>,
    pub tracked_files: usize,
    pub sync_dirs: Vec<String>,
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Pending,
    Disabled,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Pending => "pending",
            HealthStatus::Disabled => "disabled",
            HealthStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Health snapshot for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct SyncHealth {
    pub status: HealthStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SyncMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub tracked_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    pub pending_changes: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SyncHealth {
    fn bare(status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            node_id: None,
            mode: None,
            server_url: None,
            tracked_files: 0,
            last_sync: None,
            pending_changes: 0,
            errors: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::bare(HealthStatus::Disabled, "Sync is not enabled")
    }

    pub fn error(err: impl fmt::Display) -> Self {
        let message = err.to_string();
        Self {
            errors: vec![message.clone()],
            ..Self::bare(HealthStatus::Error, message)
        }
    }
}

impl<T: SyncTransport + ?Sized> SyncClient<T> {
    /// Current configuration and baseline summary.
    pub fn status(&self) -> SyncStatusReport {
        let settings = self.settings();
        let baseline = self.load_manifest();
        SyncStatusReport {
            enabled: settings.enabled,
            mode: settings.mode,
            server_url: non_empty_or(&settings.server_url, "(not configured)"),
            node_id: non_empty_or(&settings.node_id, "(not set)"),
            last_sync: baseline.as_ref().map(|m| m.created_at.to_rfc3339()),
            tracked_files: baseline.as_ref().map_or(0, |m| m.len()),
            sync_dirs: settings.sync_dirs.clone(),
        }
    }

    /// Evaluate health from settings, the baseline and a fresh local scan.
    pub fn check_health(&self) -> SyncHealth {
        let settings = self.settings();
        if !settings.enabled {
            return SyncHealth::disabled();
        }

        let status = self.status();
        let mut health = SyncHealth {
            node_id: Some(status.node_id),
            mode: Some(status.mode),
            server_url: Some(status.server_url),
            tracked_files: status.tracked_files,
            last_sync: status.last_sync,
            ..SyncHealth::bare(HealthStatus::Ok, format!("Tracking {} files", status.tracked_files))
        };

        if settings.mode == SyncMode::Auto && settings.server_url.is_empty() {
            health.status = HealthStatus::Pending;
            health.detail = "Auto mode enabled but no server URL configured".to_string();
            return health;
        }

        if let Some(delta) = self.compute_local_delta() {
            if delta.has_changes() {
                health.pending_changes = delta.total_changes();
                health.status = HealthStatus::Pending;
                health.detail = format!("{} pending changes since last sync", health.pending_changes);
            }
        }

        health
    }
}

/// Health of the vault at `vault_dir` under a merged configuration document.
///
/// Never fails: configuration problems are reported with status `error`.
pub fn check_vault_health(vault_dir: &Path, config: &serde_json::Value) -> SyncHealth {
    match health_for(vault_dir, config) {
        Ok(health) => health,
        Err(e) => SyncHealth::error(e),
    }
}

fn health_for(vault_dir: &Path, config: &serde_json::Value) -> Result<SyncHealth> {
    let settings = SyncSettings::from_config(config)?;
    if !settings.enabled {
        return Ok(SyncHealth::disabled());
    }
    Ok(SyncClient::new(vault_dir, settings)?.check_health())
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn enabled_settings(mode: SyncMode, server_url: &str) -> SyncSettings {
        SyncSettings {
            enabled: true,
            node_id: "laptop".to_string(),
            mode,
            server_url: server_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_health() {
        let dir = TempDir::new().unwrap();
        let health = check_vault_health(dir.path(), &json!({}));
        assert_eq!(health.status, HealthStatus::Disabled);
        assert_eq!(health.detail, "Sync is not enabled");
    }

    #[test]
    fn test_invalid_config_is_error() {
        let dir = TempDir::new().unwrap();
        let health = check_vault_health(
            dir.path(),
            &json!({"sync": {"enabled": true, "conflict_strategy": "coin_flip"}}),
        );
        assert_eq!(health.status, HealthStatus::Error);
        assert_eq!(health.errors.len(), 1);
    }

    #[test]
    fn test_auto_mode_without_server_is_pending() {
        let dir = TempDir::new().unwrap();
        let client = SyncClient::new(dir.path(), enabled_settings(SyncMode::Auto, "")).unwrap();

        let health = client.check_health();
        assert_eq!(health.status, HealthStatus::Pending);
        assert!(health.detail.contains("no server URL"));
    }

    #[test]
    fn test_pending_changes_since_baseline() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes/a.md", "alpha");
        let client =
            SyncClient::new(dir.path(), enabled_settings(SyncMode::Manual, "http://sync:8000")).unwrap();

        // No baseline yet.
        let health = client.check_health();
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.detail, "Tracking 0 files");

        client.save_manifest(&client.build_manifest()).unwrap();
        assert_eq!(client.check_health().status, HealthStatus::Ok);

        write(dir.path(), "notes/b.md", "beta");
        let health = client.check_health();
        assert_eq!(health.status, HealthStatus::Pending);
        assert_eq!(health.pending_changes, 1);
        assert_eq!(health.detail, "1 pending changes since last sync");
        assert_eq!(health.tracked_files, 1);
    }

    #[test]
    fn test_status_report() {
        let dir = TempDir::new().unwrap();
        let client = SyncClient::new(dir.path(), SyncSettings::default()).unwrap();

        let status = client.status();
        assert!(!status.enabled);
        assert_eq!(status.server_url, "(not configured)");
        assert_eq!(status.node_id, "(not set)");
        assert!(status.last_sync.is_none());
        assert_eq!(status.tracked_files, 0);
    }
}
