//! Content-addressed vault manifests.
//!
//! A manifest is a point-in-time inventory of every syncable file in the
//! vault, keyed by vault-relative path and carrying the SHA-256 of the file
//! content. Manifests are rebuilt from disk at the start of every cycle and
//! the last one is persisted as the baseline for the next.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use vaultsync_common::{Error, Result, VaultPath};

/// Manifest format version written into every manifest.
pub const MANIFEST_VERSION: &str = "1.0";

/// Permission bits assumed when a peer does not report them.
pub const DEFAULT_MODE: u32 = 0o644;

/// Read size used while hashing.
const HASH_CHUNK_SIZE: usize = 8 * 1024;

fn default_mode() -> u32 {
    DEFAULT_MODE
}

fn default_version() -> String {
    MANIFEST_VERSION.to_string()
}

/// Information about a single file in the vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path relative to the vault root.
    pub path: VaultPath,
    /// Lowercase hex SHA-256 of the full content.
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in seconds since the epoch.
    pub mtime: f64,
    /// POSIX permission bits.
    #[serde(default = "default_mode")]
    pub mode: u32,
}

impl FileInfo {
    pub fn new(path: VaultPath, hash: impl Into<String>, size: u64, mtime: f64, mode: u32) -> Self {
        Self {
            path,
            hash: hash.into(),
            size,
            mtime,
            mode: mode & 0o777,
        }
    }
}

/// Complete manifest of vault contents for synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultManifest {
    /// Node that produced this manifest.
    pub node_id: String,
    /// Absolute vault root on the producing node.
    pub vault_dir: PathBuf,
    /// Manifest format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// When the scan ran.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Files keyed by vault-relative path.
    #[serde(default)]
    pub files: BTreeMap<VaultPath, FileInfo>,
}

impl VaultManifest {
    /// Create an empty manifest stamped with the current time.
    pub fn new(node_id: impl Into<String>, vault_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            vault_dir: vault_dir.into(),
            version: default_version(),
            created_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    /// Create a manifest holding the given files.
    pub fn with_files(
        node_id: impl Into<String>,
        vault_dir: impl Into<PathBuf>,
        files: impl IntoIterator<Item = FileInfo>,
    ) -> Self {
        let mut manifest = Self::new(node_id, vault_dir);
        manifest.files = files.into_iter().map(|f| (f.path.clone(), f)).collect();
        manifest
    }

    /// Copy of this manifest without the given paths.
    pub fn without_paths<'a>(&self, paths: impl IntoIterator<Item = &'a VaultPath>) -> Self {
        let drop: HashSet<&VaultPath> = paths.into_iter().collect();
        Self {
            files: self
                .files
                .iter()
                .filter(|(path, _)| !drop.contains(path))
                .map(|(path, info)| (path.clone(), info.clone()))
                .collect(),
            ..self.clone()
        }
    }

    pub fn get(&self, path: &VaultPath) -> Option<&FileInfo> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save the manifest as JSON, creating parent directories.
    ///
    /// The file is written next to the target and renamed into place so an
    /// interrupted save never leaves a truncated baseline behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(&tmp, path)?;
        debug!("Saved manifest to {} ({} files)", path.display(), self.files.len());
        Ok(())
    }

    /// Load a manifest saved by [`VaultManifest::save`].
    ///
    /// A missing or unreadable file means "no baseline" and yields `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                error!("Failed to read manifest from {}: {}", path.display(), e);
                return None;
            }
        };
        match Self::from_json(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                error!("Failed to load manifest from {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Glob patterns excluding files from the manifest.
///
/// Patterns follow shell `fnmatch` rules: `*` also crosses `/`, so
/// `models/*` excludes the whole `models` tree.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::Config(format!("Invalid exclude patterns: {}", e)))?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    /// Whether the vault-relative path or its bare file name matches.
    pub fn is_excluded(&self, path: &VaultPath) -> bool {
        self.set.is_match(path.as_string()) || self.set.is_match(path.name())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Builds vault manifests by scanning the configured sync directories.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    vault_dir: PathBuf,
    node_id: String,
    sync_dirs: Vec<String>,
    excludes: ExcludeSet,
}

impl ManifestBuilder {
    /// Create a builder.
    ///
    /// # Errors
    /// - An exclude pattern is not a valid glob
    pub fn new(
        vault_dir: impl Into<PathBuf>,
        node_id: impl Into<String>,
        sync_dirs: Vec<String>,
        exclude_patterns: &[String],
    ) -> Result<Self> {
        Ok(Self {
            vault_dir: vault_dir.into(),
            node_id: node_id.into(),
            sync_dirs,
            excludes: ExcludeSet::new(exclude_patterns)?,
        })
    }

    pub fn vault_dir(&self) -> &Path {
        &self.vault_dir
    }

    /// Scan the vault and build a fresh manifest.
    ///
    /// Missing sync directories are skipped. Files that cannot be read are
    /// logged and left out; they never abort the scan.
    pub fn build(&self) -> VaultManifest {
        let mut files = Vec::new();

        for (path, rel) in self.syncable_files() {
            match self.file_info(&path, rel) {
                Ok(info) => files.push(info),
                Err(e) => warn!("Failed to read file {}: {}", path.display(), e),
            }
        }

        let manifest = VaultManifest::with_files(self.node_id.clone(), self.vault_dir.clone(), files);
        info!("Built manifest with {} files", manifest.len());
        manifest
    }

    /// Walk every configured sync directory, yielding files that survive
    /// the exclude patterns.
    fn syncable_files(&self) -> Vec<(PathBuf, VaultPath)> {
        let mut found = Vec::new();

        for sync_dir in &self.sync_dirs {
            let dir_path = self.vault_dir.join(sync_dir);
            if !dir_path.is_dir() {
                debug!("Sync directory {} not present, skipping", dir_path.display());
                continue;
            }

            for entry in WalkDir::new(&dir_path) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Failed to walk {}: {}", dir_path.display(), e);
                        continue;
                    }
                };

                // Follows symlinks so a link to a regular file is synced by content.
                let is_file = fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false);
                if !is_file {
                    continue;
                }

                let rel = match entry
                    .path()
                    .strip_prefix(&self.vault_dir)
                    .map_err(|e| Error::InvalidInput(e.to_string()))
                    .and_then(VaultPath::from_relative)
                {
                    Ok(rel) => rel,
                    Err(e) => {
                        warn!("Skipping {}: {}", entry.path().display(), e);
                        continue;
                    }
                };

                if self.excludes.is_excluded(&rel) {
                    continue;
                }

                found.push((entry.into_path(), rel));
            }
        }

        found
    }

    fn file_info(&self, path: &Path, rel: VaultPath) -> std::io::Result<FileInfo> {
        let metadata = fs::metadata(path)?;
        let mtime = match metadata.modified()?.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            Err(before) => -before.duration().as_secs_f64(),
        };

        Ok(FileInfo::new(
            rel,
            compute_file_hash(path)?,
            metadata.len(),
            mtime,
            permission_bits(&metadata),
        ))
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &fs::Metadata) -> u32 {
    DEFAULT_MODE
}

/// Compute the lowercase hex SHA-256 of a file, reading it in 8 KiB chunks.
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn builder(root: &Path, dirs: &[&str], excludes: &[&str]) -> ManifestBuilder {
        ManifestBuilder::new(
            root,
            "node-a",
            dirs.iter().map(|s| s.to_string()).collect(),
            &excludes.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_compute_file_hash() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "hello.txt", b"hello");
        let hash = compute_file_hash(&dir.path().join("hello.txt")).unwrap();
        assert_eq!(hash, HELLO_SHA256);
    }

    #[test]
    fn test_hash_spans_multiple_chunks() {
        let dir = TempDir::new().unwrap();
        let content = vec![7u8; HASH_CHUNK_SIZE * 3 + 17];
        write(dir.path(), "big.bin", &content);

        let expected = format!("{:x}", Sha256::digest(&content));
        assert_eq!(compute_file_hash(&dir.path().join("big.bin")).unwrap(), expected);
    }

    #[test]
    fn test_build_scans_sync_dirs_only() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes/a.txt", b"hello");
        write(dir.path(), "notes/deep/b.md", b"# b");
        write(dir.path(), "other/c.txt", b"not synced");

        let manifest = builder(dir.path(), &["notes", "library"], &[]).build();

        assert_eq!(manifest.len(), 2);
        let a = manifest.get(&VaultPath::parse("notes/a.txt").unwrap()).unwrap();
        assert_eq!(a.hash, HELLO_SHA256);
        assert_eq!(a.size, 5);
        assert!(a.mtime > 0.0);
        assert!(manifest.get(&VaultPath::parse("notes/deep/b.md").unwrap()).is_some());
        assert_eq!(manifest.node_id, "node-a");
        assert_eq!(manifest.version, MANIFEST_VERSION);
    }

    #[test]
    fn test_build_applies_exclude_patterns() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes/keep.md", b"keep");
        write(dir.path(), "notes/debug.log", b"log");
        write(dir.path(), "notes/sub/scratch.tmp", b"tmp");
        write(dir.path(), "models/weights.bin", b"big");

        let manifest =
            builder(dir.path(), &["notes", "models"], &["*.log", "*.tmp", "models/*"]).build();

        let paths: Vec<String> = manifest.files.keys().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["notes/keep.md"]);
    }

    #[test]
    fn test_exclude_matches_bare_filename() {
        let excludes = ExcludeSet::new(&["secret.txt".to_string()]).unwrap();
        assert!(excludes.is_excluded(&VaultPath::parse("notes/deep/secret.txt").unwrap()));
        assert!(!excludes.is_excluded(&VaultPath::parse("notes/public.txt").unwrap()));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let result = ExcludeSet::new(&["notes/[".to_string()]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_sync_dir_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let manifest = builder(dir.path(), &["config", "library"], &[]).build();
        assert!(manifest.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_records_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "config/run.sh", b"#!/bin/sh");
        let path = dir.path().join("config/run.sh");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let manifest = builder(dir.path(), &["config"], &[]).build();
        let info = manifest.get(&VaultPath::parse("config/run.sh").unwrap()).unwrap();
        assert_eq!(info.mode, 0o755);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes/a.txt", b"hello");
        write(dir.path(), "notes/b.txt", b"world");
        let manifest = builder(dir.path(), &["notes"], &[]).build();

        let path = dir.path().join("state/sync_manifest.json");
        manifest.save(&path).unwrap();
        let loaded = VaultManifest::load(&path).unwrap();

        assert_eq!(loaded.files, manifest.files);
        assert_eq!(loaded.node_id, manifest.node_id);
        assert_eq!(loaded.created_at, manifest.created_at);
    }

    #[test]
    fn test_load_missing_or_corrupt_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(VaultManifest::load(&dir.path().join("absent.json")).is_none());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(VaultManifest::load(&corrupt).is_none());

        let wrong_shape = dir.path().join("wrong.json");
        fs::write(&wrong_shape, r#"{"files": {}}"#).unwrap();
        assert!(VaultManifest::load(&wrong_shape).is_none());
    }

    #[test]
    fn test_load_fills_optional_fields() {
        let json = r#"{
            "node_id": "peer",
            "vault_dir": "/srv/vault",
            "files": {
                "notes/a.txt": {"path": "notes/a.txt", "hash": "abc", "size": 3, "mtime": 1.5}
            }
        }"#;
        let manifest = VaultManifest::from_json(json).unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        let info = manifest.get(&VaultPath::parse("notes/a.txt").unwrap()).unwrap();
        assert_eq!(info.mode, DEFAULT_MODE);
    }

    #[test]
    fn test_without_paths() {
        let a = FileInfo::new(VaultPath::parse("notes/a.txt").unwrap(), "h1", 1, 1.0, 0o644);
        let b = FileInfo::new(VaultPath::parse("notes/b.txt").unwrap(), "h2", 1, 1.0, 0o644);
        let manifest = VaultManifest::with_files("n", "/v", vec![a.clone(), b]);

        let trimmed = manifest.without_paths([&VaultPath::parse("notes/b.txt").unwrap()]);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed.get(&a.path), Some(&a));
        assert_eq!(manifest.len(), 2);
    }
}
