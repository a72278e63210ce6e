//! Mutual exclusion for sync cycles.
//!
//! One cycle per vault at a time. The lock is a file created with
//! `create_new`, so two processes racing for it cannot both win. Each
//! holder writes a unique token into the file and only ever removes or
//! refreshes a file that still carries its own token.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use vaultsync_common::{Error, Result};

/// Lock file name, placed next to the baseline manifest.
pub const LOCK_FILE_NAME: &str = ".sync.lock";

/// Locks not refreshed for this long are left over from a crashed cycle.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

/// Held while a sync cycle runs; releases the lock on drop.
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
    token: String,
}

impl SyncLock {
    /// Take the lock at `path`.
    ///
    /// # Errors
    /// - `Error::Locked` if a live cycle holds it
    /// - `Error::Io` if the lock file cannot be created
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with_stale_age(path, STALE_LOCK_AGE)
    }

    pub fn acquire_with_stale_age(path: &Path, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !Self::is_stale(path, stale_after) {
                    return Err(Error::Locked(format!(
                        "Sync lock held at {}",
                        path.display()
                    )));
                }
                warn!("Removing stale sync lock {}", path.display());
                fs::remove_file(path)?;
                Self::create(path).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => {
                        Error::Locked(format!("Sync lock held at {}", path.display()))
                    }
                    _ => Error::Io(e),
                })
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        Self::create_with(path, |file, token| writeln!(file, "{}", token))
    }

    /// Create the lock file and write the token with `write_token`. A file
    /// whose token could not be written is removed again.
    fn create_with(
        path: &Path,
        write_token: impl FnOnce(&mut File, &str) -> std::io::Result<()>,
    ) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let token = format!(
            "{} {} {:016x}",
            std::process::id(),
            Utc::now().to_rfc3339(),
            rand::random::<u64>()
        );

        if let Err(e) = write_token(&mut file, &token) {
            drop(file);
            if let Err(remove_err) = fs::remove_file(path) {
                warn!("Failed to remove half-written sync lock {}: {}", path.display(), remove_err);
            }
            return Err(e);
        }

        debug!("Acquired sync lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            token,
        })
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(|modified| {
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO)
            })
            .map(|age| age >= stale_after)
            .unwrap_or(false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the lock file still carries this holder's token.
    pub fn is_held(&self) -> bool {
        fs::read_to_string(&self.path)
            .map(|content| content.trim_end() == self.token)
            .unwrap_or(false)
    }

    /// Rewrite the token so the lock does not age into looking stale.
    ///
    /// # Errors
    /// - `Error::Locked` if another cycle has taken the lock over
    /// - `Error::Io` if the lock file cannot be read or rewritten
    pub async fn refresh(&self) -> Result<()> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::Locked(format!(
                    "Sync lock {} was removed",
                    self.path.display()
                )))
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if content.trim_end() != self.token {
            return Err(Error::Locked(format!(
                "Sync lock {} was taken over",
                self.path.display()
            )));
        }

        tokio::fs::write(&self.path, format!("{}\n", self.token)).await?;
        Ok(())
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if !self.is_held() {
            warn!(
                "Sync lock {} no longer belongs to this cycle; leaving it in place",
                self.path.display()
            );
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release sync lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join(LOCK_FILE_NAME);

        let lock = SyncLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(lock.is_held());
        assert!(matches!(SyncLock::acquire(&path), Err(Error::Locked(_))));

        drop(lock);
        assert!(!path.exists());
        assert!(SyncLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        fs::write(&path, "12345 left over").unwrap();

        let lock = SyncLock::acquire_with_stale_age(&path, Duration::ZERO).unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert!(content.starts_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_taken_over_lock_survives_previous_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let first = SyncLock::acquire(&path).unwrap();
        let second = SyncLock::acquire_with_stale_age(&path, Duration::ZERO).unwrap();
        assert!(!first.is_held());
        assert!(second.is_held());

        // The first holder finishing must not release the second one's lock.
        drop(first);
        assert!(path.exists());
        assert!(matches!(SyncLock::acquire(&path), Err(Error::Locked(_))));

        drop(second);
        assert!(!path.exists());
        assert!(SyncLock::acquire(&path).is_ok());
    }

    #[tokio::test]
    async fn test_refresh_only_by_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let first = SyncLock::acquire(&path).unwrap();
        first.refresh().await.unwrap();
        assert!(first.is_held());

        let second = SyncLock::acquire_with_stale_age(&path, Duration::ZERO).unwrap();
        assert!(matches!(first.refresh().await, Err(Error::Locked(_))));
        assert!(second.is_held());
        second.refresh().await.unwrap();
    }

    #[test]
    fn test_failed_token_write_removes_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let err = SyncLock::create_with(&path, |_, _| Err(std::io::Error::other("disk full")))
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(!path.exists());
        assert!(SyncLock::acquire(&path).is_ok());
    }
}
