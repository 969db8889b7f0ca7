use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::{
    error::Result,
    types::{
        DirectoryEntry, EntryType, Identity, RepositoryInfo, RepositoryLocation, TreeListing,
        WriteOutcome,
    },
};

/// A single item returned by the contents endpoint
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub size: u64,
    pub entry_type: EntryType,
    /// Transfer encoding of `content`, e.g. `base64`, or `none` when withheld
    pub encoding: Option<String>,
    pub content: Option<String>,
    pub html_url: Option<String>,
    pub download_url: Option<String>,
}

impl RemoteFile {
    pub fn to_entry(&self) -> DirectoryEntry {
        DirectoryEntry {
            name: self.name.clone(),
            path: self.path.clone(),
            sha: self.sha.clone(),
            size: match self.entry_type {
                EntryType::Dir => None,
                _ => Some(self.size),
            },
            entry_type: self.entry_type,
            html_url: self.html_url.clone(),
            download_url: self.download_url.clone(),
        }
    }
}

/// What lives at a path: one item, or the entries of a directory
#[derive(Debug, Clone)]
pub enum RemoteContent {
    File(RemoteFile),
    Listing(Vec<DirectoryEntry>),
}

/// Create-or-update payload; `content` is already base64-encoded
#[derive(Debug, Clone, Serialize)]
pub struct PutContent {
    #[serde(skip)]
    pub path: String,
    pub message: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Omitted for a create
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committer: Option<Identity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteContent {
    #[serde(skip)]
    pub path: String,
    pub message: String,
    pub sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Core abstraction over a remote, versioned file store
///
/// Implementors must enforce the optimistic-concurrency check themselves: a
/// put or delete whose `sha` does not match the current blob at the path is
/// rejected with `BridgeError::Conflict`.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch whatever lives at `path`
    ///
    /// Returns `BridgeError::NotFound` if nothing does
    async fn get_content(
        &self,
        location: &RepositoryLocation,
        path: &str,
        reference: Option<&str>,
    ) -> Result<RemoteContent>;

    /// Create or update one file, producing exactly one commit
    async fn put_content(
        &self,
        location: &RepositoryLocation,
        request: &PutContent,
    ) -> Result<WriteOutcome>;

    /// Delete one file, producing exactly one commit
    async fn delete_content(
        &self,
        location: &RepositoryLocation,
        request: &DeleteContent,
    ) -> Result<WriteOutcome>;

    /// Raw bytes of the blob `sha`
    ///
    /// Used when `get_content` withholds inline content for a large file.
    async fn get_blob(&self, location: &RepositoryLocation, sha: &str) -> Result<Bytes>;

    /// List the tree at `tree_ref` without any file content
    async fn get_tree(
        &self,
        location: &RepositoryLocation,
        tree_ref: &str,
        recursive: bool,
    ) -> Result<TreeListing>;

    /// Repository metadata, including its default branch
    async fn get_repository(&self, location: &RepositoryLocation) -> Result<RepositoryInfo>;

    /// Human-readable identifier for this store (for logging/debugging)
    fn identifier(&self) -> String;
}
