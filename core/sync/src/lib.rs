//! Vault Sync Engine
//!
//! Keeps a vault directory in step with a remote node, including:
//! - Content-hashed manifests of syncable files
//! - Three-way classification of changes between manifests
//! - Conflict resolution strategies with optional backups
//! - A client that uploads, downloads and persists the new baseline
//! - Manual and interval-driven scheduling

pub mod client;
pub mod conflict;
pub mod lock;
pub mod manifest;
pub mod protocol;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod status;
pub mod transport;

// Re-export main types
pub use client::{ProgressCallback, SyncClient, SyncResult};
pub use conflict::{ConflictResolution, ConflictResolver, ConflictStrategy, ResolutionAction};
pub use lock::SyncLock;
pub use manifest::{compute_file_hash, ExcludeSet, FileInfo, ManifestBuilder, VaultManifest};
pub use protocol::{
    compute_delta, FileChange, RequestType, ResponseStatus, SyncAction, SyncDelta, SyncRequest,
    SyncResponse,
};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{ScheduledRequest, SyncScheduler, SyncSchedulerHandle};
pub use settings::{load_config_file, SyncMode, SyncSettings};
pub use status::{check_vault_health, HealthStatus, SyncHealth, SyncStatusReport};
pub use transport::{HttpTransport, SyncTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _settings = SyncSettings::default();
        let _retry_config = RetryConfig::default();
        let _delta = SyncDelta::default();
        let _resolver = ConflictResolver::new("/vault", ConflictStrategy::default());
    }
}
