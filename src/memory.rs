use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::{
    encoding::{decode_content, encode_content, file_name},
    error::{BridgeError, Result},
    store::{ContentStore, DeleteContent, PutContent, RemoteContent, RemoteFile},
    types::{
        DirectoryEntry, EntryType, RepositoryInfo, RepositoryLocation, TreeEntry, TreeEntryType,
        TreeListing, WriteOutcome,
    },
};

/// In-memory content store
///
/// Keeps every repository as a set of branches, each a flat map of path to
/// bytes. Directories exist implicitly. Writes are checked against the
/// current blob sha under one lock, so concurrent writers race exactly like
/// they would against a real remote.
#[derive(Clone, Default)]
pub struct MemoryStore {
    repos: Arc<RwLock<HashMap<RepositoryLocation, MemoryRepo>>>,
}

struct MemoryRepo {
    default_branch: String,
    branches: HashMap<String, BTreeMap<String, Bytes>>,
    commits: u64,
}

/// Content-addressed id of a blob, git-style header included
pub fn blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn tree_sha(files: &BTreeMap<String, Bytes>, prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"tree\0");
    for (path, content) in files.iter().filter(|(p, _)| is_under(p, prefix)) {
        hasher.update(path.as_bytes());
        hasher.update(blob_sha(content).as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn is_under(path: &str, dir: &str) -> bool {
    dir.is_empty() || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Every proper prefix of `path` that would have to be a directory
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty repository whose default branch is `default_branch`
    pub async fn create_repository(&self, location: &RepositoryLocation, default_branch: &str) {
        let mut repos = self.repos.write().await;
        repos.entry(location.clone()).or_insert_with(|| MemoryRepo {
            default_branch: default_branch.to_string(),
            branches: HashMap::from([(default_branch.to_string(), BTreeMap::new())]),
            commits: 0,
        });
    }

    /// Fork `from` into a new branch `name`
    pub async fn create_branch(
        &self,
        location: &RepositoryLocation,
        from: &str,
        name: &str,
    ) -> Result<()> {
        let mut repos = self.repos.write().await;
        let repo = repos.get_mut(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        let files = repo
            .branches
            .get(from)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound {
                path: from.to_string(),
            })?;
        repo.branches.insert(name.to_string(), files);
        Ok(())
    }

    /// Write a file directly, bypassing sha checks; returns the blob sha
    pub async fn seed_file(
        &self,
        location: &RepositoryLocation,
        branch: Option<&str>,
        path: &str,
        content: impl Into<Bytes>,
    ) -> Result<String> {
        let mut repos = self.repos.write().await;
        let repo = repos.get_mut(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        let files = repo.branch_mut(branch)?;
        let content = content.into();
        let sha = blob_sha(&content);
        files.insert(path.to_string(), content);
        Ok(sha)
    }

    /// Raw bytes currently stored at `path`
    pub async fn file(
        &self,
        location: &RepositoryLocation,
        branch: Option<&str>,
        path: &str,
    ) -> Option<Bytes> {
        let repos = self.repos.read().await;
        let repo = repos.get(location)?;
        repo.branch(branch).ok()?.get(path).cloned()
    }

    /// Number of commits recorded in a repository
    pub async fn commit_count(&self, location: &RepositoryLocation) -> u64 {
        let repos = self.repos.read().await;
        repos.get(location).map(|r| r.commits).unwrap_or(0)
    }
}

impl MemoryRepo {
    fn resolve<'a>(&'a self, branch: Option<&'a str>) -> &'a str {
        match branch {
            None | Some("HEAD") => &self.default_branch,
            Some(name) => name,
        }
    }

    fn branch(&self, branch: Option<&str>) -> Result<&BTreeMap<String, Bytes>> {
        let name = self.resolve(branch);
        self.branches.get(name).ok_or_else(|| BridgeError::NotFound {
            path: name.to_string(),
        })
    }

    fn branch_mut(&mut self, branch: Option<&str>) -> Result<&mut BTreeMap<String, Bytes>> {
        let name = self.resolve(branch).to_string();
        self.branches
            .get_mut(&name)
            .ok_or(BridgeError::NotFound { path: name })
    }

    fn commit(&mut self, location: &RepositoryLocation, message: &str) -> (String, String) {
        self.commits += 1;
        let mut hasher = Sha256::new();
        hasher.update(format!("{location}\0{}\0{message}", self.commits).as_bytes());
        let sha = format!("{:x}", hasher.finalize());
        let url = format!("memory://{location}/commit/{sha}");
        (sha, url)
    }
}

fn check_sha(path: &str, current: Option<&Bytes>, supplied: Option<&str>) -> Result<()> {
    let conflict = |message: String| BridgeError::Conflict {
        path: path.to_string(),
        message,
    };
    match (current.map(|c| blob_sha(c)), supplied) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(conflict("\"sha\" wasn't supplied".to_string())),
        (None, Some(sha)) => Err(conflict(format!("{path} does not exist at {sha}"))),
        (Some(actual), Some(sha)) if actual == sha => Ok(()),
        (Some(_), Some(sha)) => Err(conflict(format!("{path} does not match {sha}"))),
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_content(
        &self,
        location: &RepositoryLocation,
        path: &str,
        reference: Option<&str>,
    ) -> Result<RemoteContent> {
        let repos = self.repos.read().await;
        let repo = repos.get(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        let files = repo.branch(reference)?;

        if let Some(content) = files.get(path) {
            return Ok(RemoteContent::File(RemoteFile {
                name: file_name(path).to_string(),
                path: path.to_string(),
                sha: blob_sha(content),
                size: content.len() as u64,
                entry_type: EntryType::File,
                encoding: Some("base64".to_string()),
                content: Some(encode_content(content)),
                html_url: Some(format!("memory://{location}/blob/{path}")),
                download_url: None,
            }));
        }

        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (file_path, content) in files.iter().filter(|(p, _)| is_under(p, path)) {
            let rest = if path.is_empty() {
                file_path.as_str()
            } else {
                &file_path[path.len() + 1..]
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => entries.push(DirectoryEntry {
                    name: rest.to_string(),
                    path: file_path.clone(),
                    sha: blob_sha(content),
                    size: Some(content.len() as u64),
                    entry_type: EntryType::File,
                    html_url: None,
                    download_url: None,
                }),
            }
        }

        if entries.is_empty() && dirs.is_empty() && !path.is_empty() {
            return Err(BridgeError::NotFound {
                path: path.to_string(),
            });
        }

        for dir in dirs {
            let dir_path = if path.is_empty() {
                dir.clone()
            } else {
                format!("{path}/{dir}")
            };
            entries.push(DirectoryEntry {
                name: dir,
                sha: tree_sha(files, &dir_path),
                path: dir_path,
                size: None,
                entry_type: EntryType::Dir,
                html_url: None,
                download_url: None,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(RemoteContent::Listing(entries))
    }

    async fn put_content(
        &self,
        location: &RepositoryLocation,
        request: &PutContent,
    ) -> Result<WriteOutcome> {
        let content = decode_content(&request.content)?;

        let mut repos = self.repos.write().await;
        let repo = repos.get_mut(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        let files = repo.branch_mut(request.branch.as_deref())?;

        if files.keys().any(|p| is_under(p, &request.path)) {
            return Err(BridgeError::Remote {
                status: 422,
                message: format!("{} is a directory", request.path),
            });
        }
        if let Some(file) = ancestors(&request.path).find(|dir| files.contains_key(*dir)) {
            return Err(BridgeError::Remote {
                status: 422,
                message: format!("{file} is a file, not a directory"),
            });
        }
        check_sha(&request.path, files.get(&request.path), request.sha.as_deref())?;

        let content_sha = blob_sha(&content);
        files.insert(request.path.clone(), content);
        let (commit_sha, commit_url) = repo.commit(location, &request.message);

        Ok(WriteOutcome {
            content_sha: Some(content_sha),
            commit_sha,
            commit_url: Some(commit_url),
        })
    }

    async fn delete_content(
        &self,
        location: &RepositoryLocation,
        request: &DeleteContent,
    ) -> Result<WriteOutcome> {
        let mut repos = self.repos.write().await;
        let repo = repos.get_mut(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        let files = repo.branch_mut(request.branch.as_deref())?;

        if !files.contains_key(&request.path) {
            return Err(BridgeError::NotFound {
                path: request.path.clone(),
            });
        }
        check_sha(&request.path, files.get(&request.path), Some(&request.sha))?;

        files.remove(&request.path);
        let (commit_sha, commit_url) = repo.commit(location, &request.message);

        Ok(WriteOutcome {
            content_sha: None,
            commit_sha,
            commit_url: Some(commit_url),
        })
    }

    async fn get_blob(&self, location: &RepositoryLocation, sha: &str) -> Result<Bytes> {
        let repos = self.repos.read().await;
        let repo = repos.get(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        repo.branches
            .values()
            .flat_map(|files| files.values())
            .find(|content| blob_sha(content) == sha)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound {
                path: sha.to_string(),
            })
    }

    async fn get_tree(
        &self,
        location: &RepositoryLocation,
        tree_ref: &str,
        recursive: bool,
    ) -> Result<TreeListing> {
        let repos = self.repos.read().await;
        let repo = repos.get(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        let files = repo.branch(Some(tree_ref))?;

        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (path, content) in files {
            let mut parts: Vec<&str> = path.split('/').collect();
            parts.pop();
            for depth in 1..=parts.len() {
                dirs.insert(parts[..depth].join("/"));
            }
            entries.push(TreeEntry {
                path: path.clone(),
                entry_type: TreeEntryType::Blob,
                sha: blob_sha(content),
                size: Some(content.len() as u64),
                mode: "100644".to_string(),
            });
        }
        for dir in dirs {
            entries.push(TreeEntry {
                sha: tree_sha(files, &dir),
                path: dir,
                entry_type: TreeEntryType::Tree,
                size: None,
                mode: "040000".to_string(),
            });
        }
        if !recursive {
            entries.retain(|e| !e.path.contains('/'));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(TreeListing {
            sha: tree_sha(files, ""),
            entries,
            truncated: false,
        })
    }

    async fn get_repository(&self, location: &RepositoryLocation) -> Result<RepositoryInfo> {
        let repos = self.repos.read().await;
        let repo = repos.get(location).ok_or_else(|| BridgeError::NotFound {
            path: location.to_string(),
        })?;
        let bytes: u64 = repo
            .branch(None)?
            .values()
            .map(|content| content.len() as u64)
            .sum();

        Ok(RepositoryInfo {
            name: location.repo.clone(),
            full_name: location.to_string(),
            description: None,
            default_branch: repo.default_branch.clone(),
            private: false,
            visibility: Some("public".to_string()),
            size: bytes.div_ceil(1024),
            html_url: Some(format!("memory://{location}")),
        })
    }

    fn identifier(&self) -> String {
        "memory".to_string()
    }
}
