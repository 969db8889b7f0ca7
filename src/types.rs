use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    encoding::normalize_path,
    error::{BridgeError, Result},
};

/// Identifies a remote repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryLocation {
    pub owner: String,
    pub repo: String,
}

impl RepositoryLocation {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parse an `owner/repo` slug
    pub fn parse(slug: &str) -> Result<Self> {
        match slug.trim().split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(Self::new(owner, repo))
            }
            _ => Err(BridgeError::invalid_request(format!(
                "expected repository as owner/repo, got {slug:?}"
            ))),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() || self.repo.trim().is_empty() {
            return Err(BridgeError::invalid_request(
                "repository owner and name must not be empty",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RepositoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A path inside a repository, optionally pinned to a branch, tag or commit
///
/// A `None` reference means "whatever the bridge considers the default branch".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub path: String,
    pub reference: Option<String>,
}

impl ContentRef {
    /// Build a reference to `path`; leading and trailing slashes are dropped
    pub fn new(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            reference: None,
        }
    }

    /// The repository root
    pub fn root() -> Self {
        Self::new("")
    }

    /// Pin this path to a branch, tag or commit
    pub fn at(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

/// Type of a directory entry as reported by the contents API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
    Symlink,
    Submodule,
}

impl EntryType {
    pub(crate) fn from_api(kind: &str) -> Self {
        match kind {
            "dir" => EntryType::Dir,
            "symlink" => EntryType::Symlink,
            "submodule" => EntryType::Submodule,
            _ => EntryType::File,
        }
    }
}

/// Represents an entry in a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Name of the file or folder
    pub name: String,
    /// Path relative to the repository root
    pub path: String,
    pub sha: String,
    /// Byte size; `None` for directories
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub html_url: Option<String>,
    pub download_url: Option<String>,
}

/// Result of listing a directory
///
/// Always a sequence: listing a path that turns out to be a single file
/// yields exactly one entry.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    /// The path that was listed
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
}

/// A file's decoded content and metadata, fetched fresh from the remote
///
/// The `sha` is the version token any later update of this exact path must
/// carry. It goes stale as soon as anybody else commits to the path.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub size: u64,
    /// Transfer encoding the remote used before decoding (usually `base64`)
    pub encoding: String,
    /// Decoded bytes
    pub content: Bytes,
    pub source_url: Option<String>,
}

impl FileSnapshot {
    /// UTF-8 view of the content, if it is text
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryType {
    Blob,
    Tree,
    Commit,
}

/// One item of a recursive tree listing; carries no content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: TreeEntryType,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeListing {
    pub sha: String,
    pub entries: Vec<TreeEntry>,
    /// Set when the remote cut the listing short
    pub truncated: bool,
}

/// Repository state produced by a successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    /// Sha of the new blob at the path; `None` after a delete
    pub content_sha: Option<String>,
    pub commit_sha: String,
    pub commit_url: Option<String>,
}

/// Author or committer attached to a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Repository metadata, most usefully the branch the remote treats as default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    /// `owner/repo`
    pub full_name: String,
    pub description: Option<String>,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    /// `public`, `private` or `internal`
    #[serde(default)]
    pub visibility: Option<String>,
    /// Size in KiB as reported by the remote
    #[serde(default)]
    pub size: u64,
    pub html_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let loc = RepositoryLocation::parse("acme/widgets").unwrap();
        assert_eq!(loc.owner, "acme");
        assert_eq!(loc.repo, "widgets");
        assert_eq!(loc.to_string(), "acme/widgets");

        assert!(RepositoryLocation::parse("acme").is_err());
        assert!(RepositoryLocation::parse("/widgets").is_err());
        assert!(RepositoryLocation::parse("acme/").is_err());
        assert!(RepositoryLocation::parse("a/b/c").is_err());
    }

    #[test]
    fn test_content_ref_normalizes() {
        assert!(ContentRef::new("/").is_root());
        assert!(ContentRef::new("").is_root());
        assert_eq!(ContentRef::new("//src/lib.rs").path, "src/lib.rs");
        assert_eq!(ContentRef::new("docs/").path, "docs");

        let pinned = ContentRef::new("README.md").at("v1.0");
        assert_eq!(pinned.reference.as_deref(), Some("v1.0"));
    }

    #[test]
    fn test_snapshot_text() {
        let mut snapshot = FileSnapshot {
            name: "a.txt".into(),
            path: "a.txt".into(),
            sha: "s".into(),
            size: 2,
            encoding: "base64".into(),
            content: Bytes::from_static(b"hi"),
            source_url: None,
        };
        assert_eq!(snapshot.text(), Some("hi"));

        snapshot.content = Bytes::from_static(&[0xff, 0xfe]);
        assert_eq!(snapshot.text(), None);
    }

    #[test]
    fn test_entry_type_from_api() {
        assert_eq!(EntryType::from_api("file"), EntryType::File);
        assert_eq!(EntryType::from_api("dir"), EntryType::Dir);
        assert_eq!(EntryType::from_api("symlink"), EntryType::Symlink);
        assert_eq!(EntryType::from_api("submodule"), EntryType::Submodule);
        assert_eq!(EntryType::from_api("weird"), EntryType::File);
    }
}
