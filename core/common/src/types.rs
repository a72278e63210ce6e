//! Common types used throughout vault sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A path relative to the vault root, using `/` as separator.
///
/// The wire format and the manifest key for every file. A `VaultPath` never
/// starts with `/` and never contains `.` or `..` components, so joining it
/// onto the vault root cannot escape the vault.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultPath {
    components: Vec<String>,
}

impl VaultPath {
    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if the list is empty or any component is invalid
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        if components.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Vault path cannot be empty".to_string(),
            ));
        }
        for comp in &components {
            if comp.is_empty() {
                return Err(crate::Error::InvalidInput(
                    "Path component cannot be empty".to_string(),
                ));
            }
            if comp == "." || comp == ".." {
                return Err(crate::Error::InvalidInput(format!(
                    "Path component '{}' is not allowed",
                    comp
                )));
            }
            if comp.contains('/') || comp.contains('\0') {
                return Err(crate::Error::InvalidInput(
                    "Path component cannot contain separators".to_string(),
                ));
            }
        }
        Ok(Self { components })
    }

    /// Parse a vault-relative posix path such as `notes/a.txt`.
    ///
    /// Leading slashes are rejected rather than stripped: a remote peer that
    /// sends an absolute path is sending something we must not write.
    pub fn parse(path: &str) -> crate::Result<Self> {
        if path.starts_with('/') {
            return Err(crate::Error::InvalidInput(format!(
                "Vault path must be relative: {}",
                path
            )));
        }
        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Build a vault path from a filesystem path relative to the vault root.
    pub fn from_relative(path: &Path) -> crate::Result<Self> {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        crate::Error::InvalidInput(format!(
                            "Path is not valid UTF-8: {}",
                            path.display()
                        ))
                    })?;
                    components.push(part.to_string());
                }
                Component::CurDir => {}
                _ => {
                    return Err(crate::Error::InvalidInput(format!(
                        "Not a vault-relative path: {}",
                        path.display()
                    )))
                }
            }
        }
        Self::from_components(components)
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.components.len() <= 1 {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file name (last component).
    pub fn name(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// File name without its final extension (`report.tar.gz` -> `report.tar`).
    pub fn stem(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(pos) => &name[..pos],
        }
    }

    /// Final extension including the dot, or an empty string.
    pub fn suffix(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => "",
            Some(pos) => &name[pos..],
        }
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Resolve this path below a filesystem root.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut fs_path = root.to_path_buf();
        for component in &self.components {
            fs_path.push(component);
        }
        fs_path
    }

    /// Convert to the posix string form.
    pub fn as_string(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl TryFrom<String> for VaultPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<VaultPath> for String {
    fn from(path: VaultPath) -> Self {
        path.as_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vault_path_parse() {
        let path = VaultPath::parse("notes/daily/today.md").unwrap();
        assert_eq!(path.components(), &["notes", "daily", "today.md"]);
        assert_eq!(path.to_string(), "notes/daily/today.md");
    }

    #[test]
    fn test_vault_path_rejects_escapes() {
        assert!(VaultPath::parse("").is_err());
        assert!(VaultPath::parse("/etc/passwd").is_err());
        assert!(VaultPath::parse("notes/../../etc").is_err());
        assert!(VaultPath::parse("notes//a.txt").is_err());
        assert!(VaultPath::parse("./notes").is_err());
    }

    #[test]
    fn test_vault_path_from_relative() {
        let path = VaultPath::from_relative(Path::new("library/books/a.pdf")).unwrap();
        assert_eq!(path.to_string(), "library/books/a.pdf");
        assert!(VaultPath::from_relative(Path::new("/abs/path")).is_err());
        assert!(VaultPath::from_relative(Path::new("../up")).is_err());
    }

    #[test]
    fn test_vault_path_stem_and_suffix() {
        let path = VaultPath::parse("notes/report.tar.gz").unwrap();
        assert_eq!(path.name(), "report.tar.gz");
        assert_eq!(path.stem(), "report.tar");
        assert_eq!(path.suffix(), ".gz");

        let dotfile = VaultPath::parse("config/.env").unwrap();
        assert_eq!(dotfile.stem(), ".env");
        assert_eq!(dotfile.suffix(), "");

        let bare = VaultPath::parse("README").unwrap();
        assert_eq!(bare.stem(), "README");
        assert_eq!(bare.suffix(), "");
    }

    #[test]
    fn test_vault_path_parent() {
        let path = VaultPath::parse("notes/a/b.txt").unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "notes/a");
        assert!(VaultPath::parse("b.txt").unwrap().parent().is_none());
    }

    #[test]
    fn test_vault_path_serde() {
        let path = VaultPath::parse("notes/a.txt").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"notes/a.txt\"");
        let back: VaultPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<VaultPath>("\"../x\"").is_err());
    }

    proptest! {
        #[test]
        fn test_parse_display_agree(parts in prop::collection::vec("[a-zA-Z0-9_-]{1,8}", 1..5)) {
            let joined = parts.join("/");
            let path = VaultPath::parse(&joined).unwrap();
            prop_assert_eq!(path.to_string(), joined);
            prop_assert_eq!(path.components().len(), parts.len());
        }
    }
}
