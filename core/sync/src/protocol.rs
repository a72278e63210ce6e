//! Sync wire protocol and delta computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use vaultsync_common::{Error, Result, VaultPath};

use crate::manifest::{FileInfo, VaultManifest};

/// Action attached to a single file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Add,
    Update,
    Delete,
    Conflict,
    Skip,
}

/// A change to a single file.
///
/// Which side's [`FileInfo`] is present depends on the action: `Add` carries
/// exactly one side, `Update` and `Conflict` carry both. Construction and
/// deserialization both reject other combinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFileChange")]
pub struct FileChange {
    path: VaultPath,
    action: SyncAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_info: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_info: Option<FileInfo>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "content_base64::serialize"
    )]
    content: Option<Vec<u8>>,
}

/// Unvalidated wire form of [`FileChange`].
#[derive(Deserialize)]
struct RawFileChange {
    path: VaultPath,
    action: SyncAction,
    #[serde(default)]
    local_info: Option<FileInfo>,
    #[serde(default)]
    remote_info: Option<FileInfo>,
    #[serde(default, with = "content_base64")]
    content: Option<Vec<u8>>,
}

impl TryFrom<RawFileChange> for FileChange {
    type Error = Error;

    fn try_from(raw: RawFileChange) -> Result<Self> {
        let change = FileChange::new(raw.path, raw.action, raw.local_info, raw.remote_info)?;
        Ok(match raw.content {
            Some(content) => change.with_content(content),
            None => change,
        })
    }
}

impl FileChange {
    /// Create a change, checking that the present sides fit the action.
    pub fn new(
        path: VaultPath,
        action: SyncAction,
        local_info: Option<FileInfo>,
        remote_info: Option<FileInfo>,
    ) -> Result<Self> {
        let shape_ok = match action {
            SyncAction::Add => local_info.is_some() != remote_info.is_some(),
            SyncAction::Update | SyncAction::Conflict => {
                local_info.is_some() && remote_info.is_some()
            }
            SyncAction::Delete => local_info.is_some() || remote_info.is_some(),
            SyncAction::Skip => true,
        };
        if !shape_ok {
            return Err(Error::InvalidInput(format!(
                "{:?} change for {} has local_info={} remote_info={}",
                action,
                path,
                local_info.is_some(),
                remote_info.is_some()
            )));
        }

        for info in local_info.iter().chain(remote_info.iter()) {
            if info.path != path {
                return Err(Error::InvalidInput(format!(
                    "File info for {} attached to change for {}",
                    info.path, path
                )));
            }
        }

        Ok(Self {
            path,
            action,
            local_info,
            remote_info,
            content: None,
        })
    }

    /// File present only on the local side.
    pub fn add_local(info: FileInfo) -> Self {
        Self {
            path: info.path.clone(),
            action: SyncAction::Add,
            local_info: Some(info),
            remote_info: None,
            content: None,
        }
    }

    /// File present only on the remote side.
    pub fn add_remote(info: FileInfo) -> Self {
        Self {
            path: info.path.clone(),
            action: SyncAction::Add,
            local_info: None,
            remote_info: Some(info),
            content: None,
        }
    }

    /// File present on both sides with differing content.
    pub fn update(local: FileInfo, remote: FileInfo) -> Result<Self> {
        Self::new(local.path.clone(), SyncAction::Update, Some(local), Some(remote))
    }

    /// Differing content with no way to prefer either side.
    pub fn conflict(local: FileInfo, remote: FileInfo) -> Result<Self> {
        Self::new(local.path.clone(), SyncAction::Conflict, Some(local), Some(remote))
    }

    /// Attach file bytes for transfer.
    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn path(&self) -> &VaultPath {
        &self.path
    }

    pub fn action(&self) -> SyncAction {
        self.action
    }

    pub fn local_info(&self) -> Option<&FileInfo> {
        self.local_info.as_ref()
    }

    pub fn remote_info(&self) -> Option<&FileInfo> {
        self.remote_info.as_ref()
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }
}

/// Base64 text encoding for optional file content.
mod content_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match content {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| STANDARD.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Computed differences between two manifests.
///
/// A path appears in at most one of the lists; paths whose content matches
/// on both sides appear in none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncDelta {
    pub local_node: String,
    pub remote_node: String,
    #[serde(default)]
    pub to_upload: Vec<FileChange>,
    #[serde(default)]
    pub to_download: Vec<FileChange>,
    #[serde(default)]
    pub conflicts: Vec<FileChange>,
    #[serde(default)]
    pub to_delete_local: Vec<FileChange>,
    #[serde(default)]
    pub to_delete_remote: Vec<FileChange>,
}

impl SyncDelta {
    pub fn new(local_node: impl Into<String>, remote_node: impl Into<String>) -> Self {
        Self {
            local_node: local_node.into(),
            remote_node: remote_node.into(),
            ..Default::default()
        }
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    pub fn total_changes(&self) -> usize {
        self.to_upload.len()
            + self.to_download.len()
            + self.conflicts.len()
            + self.to_delete_local.len()
            + self.to_delete_remote.len()
    }

    /// Paths classified as conflicts.
    pub fn conflict_paths(&self) -> HashSet<&VaultPath> {
        self.conflicts.iter().map(|c| c.path()).collect()
    }

    /// Human-readable summary such as `2 to upload, 1 conflicts`.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            (self.to_upload.len(), "to upload"),
            (self.to_download.len(), "to download"),
            (self.conflicts.len(), "conflicts"),
            (self.to_delete_local.len(), "to delete locally"),
            (self.to_delete_remote.len(), "to delete remotely"),
        ]
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, label)| format!("{} {}", count, label))
        .collect();

        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Kind of sync a client asks the remote for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    #[default]
    Full,
    Delta,
    Pull,
    Push,
}

/// Request sent to initiate a sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub node_id: String,
    pub manifest: VaultManifest,
    #[serde(default)]
    pub request_type: RequestType,
    pub timestamp: DateTime<Utc>,
}

impl SyncRequest {
    pub fn new(node_id: impl Into<String>, manifest: VaultManifest, request_type: RequestType) -> Self {
        Self {
            node_id: node_id.into(),
            manifest,
            request_type,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome reported by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
    Conflict,
}

/// Response to a [`SyncRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub status: ResponseStatus,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<SyncDelta>,
    /// File payloads for the client to write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

impl SyncResponse {
    pub fn ok(node_id: impl Into<String>, delta: Option<SyncDelta>, files: Vec<FileChange>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            node_id: node_id.into(),
            delta,
            files,
            message: String::new(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            node_id: node_id.into(),
            delta: None,
            files: Vec::new(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// First payload carrying content for `path`.
    pub fn payload_for(&self, path: &VaultPath) -> Option<&FileChange> {
        self.files
            .iter()
            .find(|f| f.path() == path && f.content().is_some())
    }
}

/// Compute the delta between a local and a remote manifest.
///
/// Paths only on one side become `Add`s in the matching direction. Paths on
/// both sides with differing hashes go to the side with the newer mtime;
/// equal mtimes are a conflict. The same function applied to a fresh scan
/// and the saved baseline gives the local changes since the last sync.
pub fn compute_delta(local: &VaultManifest, remote: &VaultManifest) -> SyncDelta {
    let mut delta = SyncDelta::new(local.node_id.clone(), remote.node_id.clone());

    for (path, local_info) in &local.files {
        let Some(remote_info) = remote.files.get(path) else {
            delta.to_upload.push(FileChange::add_local(local_info.clone()));
            continue;
        };

        if local_info.hash == remote_info.hash {
            continue;
        }

        let change = FileChange {
            path: path.clone(),
            action: SyncAction::Update,
            local_info: Some(local_info.clone()),
            remote_info: Some(remote_info.clone()),
            content: None,
        };

        if local_info.mtime > remote_info.mtime {
            delta.to_upload.push(change);
        } else if remote_info.mtime > local_info.mtime {
            delta.to_download.push(change);
        } else {
            delta.conflicts.push(FileChange {
                action: SyncAction::Conflict,
                ..change
            });
        }
    }

    for (path, remote_info) in &remote.files {
        if !local.files.contains_key(path) {
            delta.to_download.push(FileChange::add_remote(remote_info.clone()));
        }
    }

    delta
}
