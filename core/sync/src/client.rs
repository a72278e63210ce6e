//! Sync client that drives one synchronization cycle against a remote.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use vaultsync_common::{Error, Result, VaultPath};

use crate::conflict::{ConflictResolution, ConflictResolver, ResolutionAction};
use crate::lock::{SyncLock, LOCK_FILE_NAME};
use crate::manifest::{ManifestBuilder, VaultManifest};
use crate::protocol::{compute_delta, FileChange, RequestType, ResponseStatus, SyncDelta, SyncRequest};
use crate::retry::RetryExecutor;
use crate::settings::SyncSettings;
use crate::transport::{HttpTransport, SyncTransport};

/// Progress hook: `(stage, current, total)`.
pub type ProgressCallback = Arc<dyn Fn(&str, u32, u32) + Send + Sync>;

const TOTAL_STAGES: u32 = 5;

/// Result of a sync operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub uploaded: usize,
    pub downloaded: usize,
    pub conflicts_resolved: usize,
    pub conflicts_pending: usize,
    pub errors: Vec<String>,
    pub message: String,
}

impl SyncResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Convert an error that ended the cycle into a failed result.
    fn from_error(err: &Error) -> Self {
        let message = match err {
            Error::Http { status, reason } => format!("HTTP error: {} {}", status, reason),
            Error::Network(reason) => format!("Connection error: {}", reason),
            other => format!("Sync failed: {}", other),
        };
        Self {
            errors: vec![err.to_string()],
            ..Self::failure(message)
        }
    }
}

/// Client for vault synchronization with a remote server or peer.
pub struct SyncClient<T: SyncTransport + ?Sized> {
    vault_dir: PathBuf,
    settings: SyncSettings,
    builder: ManifestBuilder,
    resolver: ConflictResolver,
    transport: Arc<T>,
    retry: RetryExecutor,
    manifest_path: PathBuf,
    lock_path: PathBuf,
    progress: Option<ProgressCallback>,
}

impl SyncClient<HttpTransport> {
    /// Create a client talking JSON over HTTP.
    pub fn new(vault_dir: impl Into<PathBuf>, settings: SyncSettings) -> Result<Self> {
        let transport = HttpTransport::new(settings.exchange_timeout(), settings.upload_timeout())?;
        Self::with_transport(vault_dir, settings, Arc::new(transport))
    }
}

impl<T: SyncTransport + ?Sized> SyncClient<T> {
    /// Create a client over an arbitrary transport.
    ///
    /// # Errors
    /// - An exclude pattern in `settings` is not a valid glob
    pub fn with_transport(
        vault_dir: impl Into<PathBuf>,
        settings: SyncSettings,
        transport: Arc<T>,
    ) -> Result<Self> {
        let vault_dir = vault_dir.into();
        let builder = ManifestBuilder::new(
            vault_dir.clone(),
            settings.node_id.clone(),
            settings.sync_dirs.clone(),
            &settings.exclude_patterns,
        )?;

        let mut resolver = ConflictResolver::new(vault_dir.clone(), settings.conflict_strategy);
        if let Some(backup_dir) = settings.backup_dir(&vault_dir) {
            resolver = resolver.with_backup_dir(backup_dir);
        }

        let manifest_path = settings.manifest_path(&vault_dir);
        let lock_path = manifest_path
            .parent()
            .unwrap_or(&vault_dir)
            .join(LOCK_FILE_NAME);

        Ok(Self {
            retry: RetryExecutor::new(settings.retry_config()),
            vault_dir,
            settings,
            builder,
            resolver,
            transport,
            manifest_path,
            lock_path,
            progress: None,
        })
    }

    /// Report stage progress to `callback`.
    pub fn with_progress(mut self, callback: impl Fn(&str, u32, u32) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn vault_dir(&self) -> &Path {
        &self.vault_dir
    }

    /// Build a fresh manifest of local vault contents.
    pub fn build_manifest(&self) -> VaultManifest {
        self.builder.build()
    }

    /// Load the last saved baseline manifest.
    pub fn load_manifest(&self) -> Option<VaultManifest> {
        VaultManifest::load(&self.manifest_path)
    }

    /// Save a manifest as the new baseline.
    pub fn save_manifest(&self, manifest: &VaultManifest) -> Result<()> {
        manifest.save(&self.manifest_path)
    }

    /// Changes since the last sync, or `None` when there is no baseline.
    pub fn compute_local_delta(&self) -> Option<SyncDelta> {
        let Some(baseline) = self.load_manifest() else {
            info!("No previous manifest found - all files are new");
            return None;
        };
        Some(compute_delta(&self.build_manifest(), &baseline))
    }

    /// Run a full sync with `server_url`, or the configured server.
    pub async fn sync_with_server(&self, server_url: Option<&str>) -> SyncResult {
        self.sync(server_url, RequestType::Full).await
    }

    /// Run one sync cycle. Never fails: errors are reported in the result.
    pub async fn sync(&self, server_url: Option<&str>, request_type: RequestType) -> SyncResult {
        let url = server_url
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.settings.server_url);
        if url.is_empty() {
            return SyncResult::failure("No server URL configured");
        }

        let server = match Url::parse(url) {
            Ok(server) => server,
            Err(e) => {
                return SyncResult {
                    errors: vec![e.to_string()],
                    ..SyncResult::failure(format!("Invalid server URL: {}", url))
                }
            }
        };

        let lock_path = self.lock_path.clone();
        let acquired = tokio::task::spawn_blocking(move || SyncLock::acquire(&lock_path))
            .await
            .unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e.to_string()))));
        let lock = match acquired {
            Ok(lock) => lock,
            Err(Error::Locked(reason)) => {
                warn!("Sync skipped: {}", reason);
                return SyncResult {
                    errors: vec![reason],
                    ..SyncResult::failure("Another sync is already in progress")
                };
            }
            Err(e) => return SyncResult::from_error(&e),
        };

        match self.run_cycle(&server, request_type, &lock).await {
            Ok(result) => result,
            Err(e) => {
                error!("Sync failed: {}", e);
                SyncResult::from_error(&e)
            }
        }
    }

    async fn run_cycle(
        &self,
        server: &Url,
        request_type: RequestType,
        lock: &SyncLock,
    ) -> Result<SyncResult> {
        info!("Starting {:?} sync with {}", request_type, server);

        let builder = self.builder.clone();
        let local_manifest = tokio::task::spawn_blocking(move || builder.build())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        self.report_progress("Building manifest", 1);

        let request = SyncRequest::new(self.settings.node_id.clone(), local_manifest, request_type);
        let transport: &T = &self.transport;
        let request_ref = &request;
        let response = self
            .retry
            .execute(move || transport.exchange(server, request_ref))
            .await?;
        self.report_progress("Received response", 2);
        Self::keep_alive(lock).await;

        if response.status != ResponseStatus::Ok {
            warn!("Server rejected sync: {:?} {}", response.status, response.message);
            return Ok(SyncResult::failure(format!("Server error: {}", response.message)));
        }

        let SyncRequest { manifest: scanned, .. } = request;
        let Some(delta) = response.delta.as_ref() else {
            self.persist_baseline(scanned, Vec::new()).await?;
            self.report_progress("Sync complete", TOTAL_STAGES);
            info!("Already in sync");
            return Ok(SyncResult {
                success: true,
                message: "Already in sync".to_string(),
                ..Default::default()
            });
        };

        let mut result = SyncResult {
            success: true,
            ..Default::default()
        };

        result.uploaded = self
            .upload_files(server, &delta.to_upload, &mut result.errors)
            .await;
        self.report_progress("Uploaded files", 3);
        Self::keep_alive(lock).await;

        // Conflicting paths are only written by the resolution step.
        let conflict_paths = delta.conflict_paths();
        result.downloaded = self
            .download_files(&response.files, &conflict_paths, &mut result.errors)
            .await;
        self.report_progress("Downloaded files", 4);
        Self::keep_alive(lock).await;

        let mut pending: Vec<VaultPath> = Vec::new();
        let resolutions = self.resolve_conflicts(&delta.conflicts).await?;
        for (conflict, resolution) in delta.conflicts.iter().zip(resolutions) {
            let path = conflict.path();
            match resolution.action {
                ResolutionAction::Skip => {
                    info!("Conflict left pending: {} ({})", path, resolution.message);
                    result.conflicts_pending += 1;
                    pending.push(path.clone());
                }
                ResolutionAction::UseLocal => {
                    info!("Kept local version: {}", path);
                    result.conflicts_resolved += 1;
                }
                ResolutionAction::UseRemote => match response.payload_for(path) {
                    Some(payload) => match self.write_payload(payload).await {
                        Ok(()) => {
                            info!("Applied remote version: {}", path);
                            result.conflicts_resolved += 1;
                        }
                        Err(e) => {
                            error!("Failed to apply remote version of {}: {}", path, e);
                            result.errors.push(format!("Failed to apply {}: {}", path, e));
                            result.conflicts_pending += 1;
                            pending.push(path.clone());
                        }
                    },
                    None => {
                        warn!("No remote content received for conflict {}", path);
                        result
                            .errors
                            .push(format!("No remote content for conflict {}", path));
                        result.conflicts_pending += 1;
                        pending.push(path.clone());
                    }
                },
            }
        }

        // Files already moved in both directions; keep their counts.
        if let Err(e) = self.persist_baseline(scanned, pending).await {
            error!("Failed to save sync baseline: {}", e);
            result.success = false;
            result.message = format!("Sync failed: {}", e);
            result.errors.push(e.to_string());
            return Ok(result);
        }
        self.report_progress("Sync complete", TOTAL_STAGES);

        result.message = delta.summary();
        info!(
            "Sync complete: {} uploaded, {} downloaded, {} conflicts resolved, {} pending",
            result.uploaded, result.downloaded, result.conflicts_resolved, result.conflicts_pending
        );
        Ok(result)
    }

    /// Upload each change with its current bytes. Failures are logged and
    /// skipped; returns the number of successful uploads.
    async fn upload_files(&self, server: &Url, changes: &[FileChange], errors: &mut Vec<String>) -> usize {
        let mut uploaded = 0;
        let transport: &T = &self.transport;

        for change in changes {
            let fs_path = change.path().to_fs_path(&self.vault_dir);
            let content = match tokio::fs::read(&fs_path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("File not found for upload: {}", change.path());
                    errors.push(format!("File not found for upload: {}", change.path()));
                    continue;
                }
                Err(e) => {
                    error!("Failed to read {} for upload: {}", change.path(), e);
                    errors.push(format!("Failed to read {}: {}", change.path(), e));
                    continue;
                }
            };

            let payload = change.clone().with_content(content);
            let payload_ref = &payload;
            match self
                .retry
                .execute(move || transport.upload(server, payload_ref))
                .await
            {
                Ok(()) => {
                    debug!("Uploaded: {}", change.path());
                    uploaded += 1;
                }
                Err(e) => {
                    error!("Failed to upload {}: {}", change.path(), e);
                    errors.push(format!("Failed to upload {}: {}", change.path(), e));
                }
            }
        }

        uploaded
    }

    /// Write every payload carrying content, except paths in `skip`.
    async fn download_files(
        &self,
        files: &[FileChange],
        skip: &HashSet<&VaultPath>,
        errors: &mut Vec<String>,
    ) -> usize {
        let mut downloaded = 0;

        for change in files {
            if change.content().is_none() || skip.contains(change.path()) {
                continue;
            }
            match self.write_payload(change).await {
                Ok(()) => {
                    debug!("Downloaded: {}", change.path());
                    downloaded += 1;
                }
                Err(e) => {
                    error!("Failed to download {}: {}", change.path(), e);
                    errors.push(format!("Failed to download {}: {}", change.path(), e));
                }
            }
        }

        downloaded
    }

    /// Write a payload's bytes into the vault, restoring its permission bits.
    async fn write_payload(&self, change: &FileChange) -> Result<()> {
        let content = change
            .content()
            .ok_or_else(|| Error::InvalidInput(format!("No content for {}", change.path())))?;

        let fs_path = change.path().to_fs_path(&self.vault_dir);
        if let Some(parent) = fs_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&fs_path, content).await?;

        if let Some(mode) = change.remote_info().map(|info| info.mode).filter(|m| *m != 0) {
            set_mode(&fs_path, mode).await?;
        }
        Ok(())
    }

    /// Run the resolver on the blocking pool; BACKUP_BOTH copies files.
    async fn resolve_conflicts(&self, conflicts: &[FileChange]) -> Result<Vec<ConflictResolution>> {
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }
        let resolver = self.resolver.clone();
        let conflicts = conflicts.to_vec();
        tokio::task::spawn_blocking(move || resolver.resolve_all(&conflicts))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
    }

    /// Save the scanned manifest as the next baseline.
    ///
    /// Paths whose conflicts stayed unresolved are kept unless the settings
    /// ask to drop them; keeping them marks them as in sync next cycle.
    async fn persist_baseline(&self, manifest: VaultManifest, pending: Vec<VaultPath>) -> Result<()> {
        let manifest = if pending.is_empty() {
            manifest
        } else if self.settings.exclude_pending_from_baseline {
            debug!("Leaving {} unresolved paths out of the baseline", pending.len());
            manifest.without_paths(&pending)
        } else {
            warn!(
                "Saving baseline with {} unresolved conflicts; they will read as in sync",
                pending.len()
            );
            manifest
        };

        let path = self.manifest_path.clone();
        tokio::task::spawn_blocking(move || manifest.save(&path))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
    }

    /// Refresh the cycle lock between stages. Losing it is logged; the
    /// cycle still finishes so its counts reach the caller.
    async fn keep_alive(lock: &SyncLock) {
        if let Err(e) = lock.refresh().await {
            warn!("Sync lock refresh failed: {}", e);
        }
    }

    fn report_progress(&self, message: &str, current: u32) {
        if let Some(callback) = &self.progress {
            callback(message, current, TOTAL_STAGES);
        }
        debug!("Sync progress: {} ({}/{})", message, current, TOTAL_STAGES);
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
