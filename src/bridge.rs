use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::{
    config::{BridgeConfig, DEFAULT_MAX_FILE_SIZE},
    encoding::{decode_content, encode_content, require_path},
    error::{BridgeError, Result},
    github::GitHubStore,
    store::{ContentStore, DeleteContent, PutContent, RemoteContent, RemoteFile},
    types::{
        ContentRef, DirectoryListing, EntryType, FileSnapshot, Identity, RepositoryInfo,
        RepositoryLocation, TreeListing, WriteOutcome,
    },
};

/// Arguments for [`ContentBridge::upsert_file`]
#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub path: String,
    /// Raw bytes; text and binary are treated alike
    pub content: Bytes,
    pub message: String,
    pub branch: Option<String>,
    /// Sha the caller believes is current; skips discovery when set
    pub expected_sha: Option<String>,
    pub author: Option<Identity>,
    pub committer: Option<Identity>,
}

impl UpsertRequest {
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            message: message.into(),
            branch: None,
            expected_sha: None,
            author: None,
            committer: None,
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn expected_sha(mut self, sha: impl Into<String>) -> Self {
        self.expected_sha = Some(sha.into());
        self
    }

    pub fn author(mut self, author: Identity) -> Self {
        self.author = Some(author);
        self
    }

    pub fn committer(mut self, committer: Identity) -> Self {
        self.committer = Some(committer);
        self
    }
}

/// Arguments for [`ContentBridge::delete_file`]
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub path: String,
    /// Defaults to `Delete <path>`
    pub message: Option<String>,
    pub branch: Option<String>,
}

impl DeleteRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: None,
            branch: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Safe read/write access to files in remote repositories
///
/// The bridge keeps no state between calls: the remote is the source of
/// truth and every sha it hands out is only a version token. Construct it
/// once and share it by reference; all serialization of conflicting writes
/// is left to the store's sha check.
pub struct ContentBridge {
    store: Arc<dyn ContentStore>,
    default_branch: Option<String>,
    max_file_size: u64,
    operation_timeout: Option<Duration>,
}

impl ContentBridge {
    /// Create a bridge over any store, with no default branch and no deadline
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            default_branch: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            operation_timeout: None,
        }
    }

    /// Create a GitHub-backed bridge
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let store = GitHubStore::new(config)?;
        Ok(Self::new(Arc::new(store)).with_settings(config))
    }

    /// Apply the branch, size and deadline settings of `config`
    pub fn with_settings(mut self, config: &BridgeConfig) -> Self {
        self.default_branch = config.default_branch.clone();
        self.max_file_size = config.max_file_size;
        self.operation_timeout = config.operation_timeout();
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn default_branch(&self) -> Option<&str> {
        self.default_branch.as_deref()
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    fn branch_or_default<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.default_branch.as_deref())
    }

    /// Run `fut` under the operation deadline; expiry drops the in-flight call
    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| BridgeError::Timeout {
                    operation: operation.to_string(),
                })?,
            None => fut.await,
        }
    }

    /// The file currently at `path`, without decoding or size checks
    async fn current_file(
        &self,
        location: &RepositoryLocation,
        path: &str,
        reference: Option<&str>,
    ) -> Result<RemoteFile> {
        match self.store.get_content(location, path, reference).await? {
            RemoteContent::File(file) if file.entry_type == EntryType::File => Ok(file),
            _ => Err(BridgeError::NotAFile {
                path: path.to_string(),
            }),
        }
    }

    /// List a directory; a path naming a single file yields a one-entry listing
    #[instrument(skip(self), fields(repo = %location, path = %target.path))]
    pub async fn list_directory(
        &self,
        location: &RepositoryLocation,
        target: &ContentRef,
    ) -> Result<DirectoryListing> {
        location.validate()?;
        let path = if target.is_root() {
            String::new()
        } else {
            require_path(&target.path)?
        };
        let reference = self.branch_or_default(target.reference.as_deref());

        self.bounded("list_directory", async {
            let entries = match self.store.get_content(location, &path, reference).await? {
                RemoteContent::Listing(entries) => entries,
                RemoteContent::File(file) => vec![file.to_entry()],
            };
            debug!(count = entries.len(), "listed directory");
            Ok(DirectoryListing { path, entries })
        })
        .await
    }

    /// Read and decode one file
    #[instrument(skip(self), fields(repo = %location, path = %target.path))]
    pub async fn read_file(
        &self,
        location: &RepositoryLocation,
        target: &ContentRef,
    ) -> Result<FileSnapshot> {
        location.validate()?;
        let path = require_path(&target.path)?;
        let reference = self.branch_or_default(target.reference.as_deref());

        self.bounded("read_file", async {
            let file = self.current_file(location, &path, reference).await?;

            if file.size > self.max_file_size {
                return Err(BridgeError::TooLarge {
                    path,
                    size: file.size,
                    limit: self.max_file_size,
                });
            }

            let encoding = file.encoding.unwrap_or_else(|| "none".to_string());
            let content = match (encoding.as_str(), file.content.as_deref()) {
                ("base64", Some(encoded)) => decode_content(encoded)?,
                _ if file.size == 0 => Bytes::new(),
                // Inline content is withheld above 1 MiB; the size is already within the ceiling
                ("none", _) | (_, None) => {
                    debug!(size = file.size, sha = %file.sha, "content withheld; fetching blob");
                    self.store.get_blob(location, &file.sha).await?
                }
                (other, Some(_)) => {
                    return Err(BridgeError::invalid_structure(format!(
                        "unsupported content encoding {other:?} for {path}"
                    )))
                }
            };

            if content.len() as u64 != file.size {
                return Err(BridgeError::invalid_structure(format!(
                    "{path}: decoded {} bytes but the remote reported {}",
                    content.len(),
                    file.size
                )));
            }

            debug!(size = file.size, sha = %file.sha, "read file");
            Ok(FileSnapshot {
                name: file.name,
                path: file.path,
                sha: file.sha,
                size: file.size,
                encoding,
                content,
                source_url: file.html_url.or(file.download_url),
            })
        })
        .await
    }

    /// Create or update one file, producing exactly one commit
    ///
    /// With `expected_sha` the caller's version token is sent as is. Without
    /// it the current sha on the target branch is looked up first; only a
    /// `NotFound` there turns the call into a create. A sha mismatch at the
    /// remote comes back as `Conflict` and is never retried here.
    #[instrument(
        skip(self, request),
        fields(repo = %location, path = %request.path, expected_sha = ?request.expected_sha)
    )]
    pub async fn upsert_file(
        &self,
        location: &RepositoryLocation,
        request: UpsertRequest,
    ) -> Result<WriteOutcome> {
        location.validate()?;
        let path = require_path(&request.path)?;
        if request.message.trim().is_empty() {
            return Err(BridgeError::invalid_request("a commit message is required"));
        }
        let branch = self
            .branch_or_default(request.branch.as_deref())
            .map(str::to_string);

        self.bounded("upsert_file", async {
            let sha = match request.expected_sha {
                Some(sha) => Some(sha),
                None => match self.current_file(location, &path, branch.as_deref()).await {
                    Ok(file) => {
                        debug!(sha = %file.sha, "file exists; updating");
                        Some(file.sha)
                    }
                    Err(BridgeError::NotFound { .. }) => {
                        debug!("file does not exist; creating");
                        None
                    }
                    Err(e) => return Err(e),
                },
            };
            let creating = sha.is_none();

            let put = PutContent {
                path,
                message: request.message,
                content: encode_content(&request.content),
                branch,
                sha,
                author: request.author,
                committer: request.committer,
            };
            let outcome = self.store.put_content(location, &put).await?;

            info!(
                commit = %outcome.commit_sha,
                created = creating,
                bytes = request.content.len(),
                "wrote file"
            );
            Ok(outcome)
        })
        .await
    }

    /// Delete one file at its currently committed version
    #[instrument(skip(self, request), fields(repo = %location, path = %request.path))]
    pub async fn delete_file(
        &self,
        location: &RepositoryLocation,
        request: DeleteRequest,
    ) -> Result<WriteOutcome> {
        location.validate()?;
        let path = require_path(&request.path)?;
        let branch = self
            .branch_or_default(request.branch.as_deref())
            .map(str::to_string);
        let message = request
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Delete {path}"));

        self.bounded("delete_file", async {
            let current = self.current_file(location, &path, branch.as_deref()).await?;

            let delete = DeleteContent {
                path,
                message,
                sha: current.sha,
                branch,
            };
            let outcome = self.store.delete_content(location, &delete).await?;

            info!(commit = %outcome.commit_sha, "deleted file");
            Ok(outcome)
        })
        .await
    }

    /// Repository metadata; reports the branch the remote uses when none is named
    #[instrument(skip(self), fields(repo = %location))]
    pub async fn repository_info(&self, location: &RepositoryLocation) -> Result<RepositoryInfo> {
        location.validate()?;

        self.bounded("repository_info", async {
            let info = self.store.get_repository(location).await?;
            debug!(default_branch = %info.default_branch, "fetched repository info");
            Ok(info)
        })
        .await
    }

    /// Inventory every blob and tree under `reference` without any content
    #[instrument(skip(self), fields(repo = %location))]
    pub async fn list_tree_recursive(
        &self,
        location: &RepositoryLocation,
        reference: Option<&str>,
    ) -> Result<TreeListing> {
        location.validate()?;
        let tree_ref = self.branch_or_default(reference).unwrap_or("HEAD");

        self.bounded("list_tree_recursive", async {
            let tree = self.store.get_tree(location, tree_ref, true).await?;
            debug!(count = tree.entries.len(), truncated = tree.truncated, "listed tree");
            Ok(tree)
        })
        .await
    }
}
