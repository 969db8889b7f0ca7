use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER},
    Client, Method, Response, StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::BridgeConfig,
    encoding::decode_content,
    error::{BridgeError, Result},
    store::{ContentStore, DeleteContent, PutContent, RemoteContent, RemoteFile},
    types::{EntryType, RepositoryInfo, RepositoryLocation, TreeEntry, TreeListing, WriteOutcome},
};

const API_VERSION: &str = "2022-11-28";
/// Wait used when a throttling response carries no usable delay
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

/// GitHub-backed content store
///
/// Talks to the REST contents API (`/repos/{owner}/{repo}/contents/{path}`)
/// for single paths and to the git trees API for recursive inventories.
#[derive(Clone)]
pub struct GitHubStore {
    client: Client,
    base_url: Url,
    max_retries: u32,
    max_retry_delay: Duration,
}

#[derive(Deserialize)]
struct GitHubContentItem {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "type")]
    entry_type: String,
    encoding: Option<String>,
    content: Option<String>,
    html_url: Option<String>,
    download_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GitHubContents {
    Listing(Vec<GitHubContentItem>),
    Item(GitHubContentItem),
}

#[derive(Deserialize)]
struct GitHubWriteResponse {
    content: Option<GitHubBlobRef>,
    commit: GitHubCommit,
}

#[derive(Deserialize)]
struct GitHubBlobRef {
    sha: String,
}

#[derive(Deserialize)]
struct GitHubCommit {
    sha: String,
    html_url: Option<String>,
}

#[derive(Deserialize)]
struct GitHubTree {
    sha: String,
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct GitHubBlob {
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct GitHubErrorBody {
    message: String,
}

/// Whether a failed call tried to change remote state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl From<GitHubContentItem> for RemoteFile {
    fn from(item: GitHubContentItem) -> Self {
        RemoteFile {
            entry_type: EntryType::from_api(&item.entry_type),
            name: item.name,
            path: item.path,
            sha: item.sha,
            size: item.size,
            encoding: item.encoding,
            content: item.content,
            html_url: item.html_url,
            download_url: item.download_url,
        }
    }
}

impl From<GitHubWriteResponse> for WriteOutcome {
    fn from(resp: GitHubWriteResponse) -> Self {
        WriteOutcome {
            content_sha: resp.content.map(|c| c.sha),
            commit_sha: resp.commit.sha,
            commit_url: resp.commit.html_url,
        }
    }
}

impl GitHubStore {
    /// Build a store from bridge settings
    ///
    /// The token, timeouts and retry bounds are fixed for the lifetime of the
    /// store; clone it to share.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        match config.token.as_deref() {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                    BridgeError::InvalidConfig {
                        message: format!("token is not a valid header value: {e}"),
                    }
                })?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            None => warn!("no GitHub token configured; requests are anonymous and writes will fail"),
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BridgeError::InvalidConfig {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url()?,
            max_retries: config.max_rate_limit_retries,
            max_retry_delay: config.max_retry_delay(),
        })
    }

    /// `{base}/repos/{owner}/{repo}/{tail...}`, every segment percent-encoded
    fn repo_url<'a>(
        &self,
        location: &'a RepositoryLocation,
        tail: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BridgeError::InvalidConfig {
                message: format!("api base url {} cannot take a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(["repos", location.owner.as_str(), location.repo.as_str()])
            .extend(tail);
        Ok(url)
    }

    fn contents_url(&self, location: &RepositoryLocation, path: &str) -> Result<Url> {
        // The root listing is `contents/`, everything else one segment per component
        let segments: Vec<&str> = if path.is_empty() {
            vec!["contents", ""]
        } else {
            std::iter::once("contents").chain(path.split('/')).collect()
        };
        self.repo_url(location, segments)
    }

    fn tree_url(&self, location: &RepositoryLocation, tree_ref: &str) -> Result<Url> {
        self.repo_url(location, ["git", "trees", tree_ref])
    }

    fn blob_url(&self, location: &RepositoryLocation, sha: &str) -> Result<Url> {
        self.repo_url(location, ["git", "blobs", sha])
    }

    /// Send a request, retrying only on throttling
    ///
    /// A retry happens at most `max_retries` times and only when the server's
    /// requested wait fits in `max_retry_delay`.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        access: Access,
        path: &str,
    ) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let headers = response.headers().clone();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => unreadable_body(status, &e),
            };
            let error = classify(status, &headers, &text, path, access);

            if let BridgeError::RateLimited { retry_after, .. } = &error {
                let delay = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_DELAY);
                if attempt < self.max_retries && delay <= self.max_retry_delay {
                    attempt += 1;
                    warn!(
                        %method,
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "GitHub rate limit hit; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            debug!(%method, path, status = status.as_u16(), "GitHub request failed");
            return Err(error);
        }
    }
}

/// Map a failed GitHub response onto the error taxonomy
fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    path: &str,
    access: Access,
) -> BridgeError {
    let message = remote_message(status, body);
    match status {
        StatusCode::UNAUTHORIZED => BridgeError::Unauthorized { message },
        StatusCode::TOO_MANY_REQUESTS => BridgeError::RateLimited {
            message,
            retry_after: retry_after(headers),
        },
        StatusCode::FORBIDDEN if is_rate_limited(headers, &message) => BridgeError::RateLimited {
            message,
            retry_after: retry_after(headers),
        },
        StatusCode::FORBIDDEN => BridgeError::Unauthorized { message },
        StatusCode::NOT_FOUND => BridgeError::NotFound {
            path: path.to_string(),
        },
        StatusCode::CONFLICT if access == Access::Write => BridgeError::Conflict {
            path: path.to_string(),
            message,
        },
        // "sha wasn't supplied" / "does not match": the path changed under us
        StatusCode::UNPROCESSABLE_ENTITY
            if access == Access::Write && message.to_ascii_lowercase().contains("sha") =>
        {
            BridgeError::Conflict {
                path: path.to_string(),
                message,
            }
        }
        status => BridgeError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

fn remote_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<GitHubErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Stand-in error text when the failure response body itself could not be read
fn unreadable_body(status: StatusCode, err: &dyn std::fmt::Display) -> String {
    format!(
        "{} (body unreadable: {err})",
        status.canonical_reason().unwrap_or("unknown error")
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_rate_limited(headers: &HeaderMap, message: &str) -> bool {
    header_str(headers, "x-ratelimit-remaining") == Some("0")
        || headers.contains_key(RETRY_AFTER)
        || message.to_ascii_lowercase().contains("rate limit")
}

/// Server-indicated wait: `retry-after` seconds, else time until `x-ratelimit-reset`
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.trim().parse().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset: u64 = header_str(headers, "x-ratelimit-reset")?.trim().parse().ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

#[async_trait]
impl ContentStore for GitHubStore {
    async fn get_content(
        &self,
        location: &RepositoryLocation,
        path: &str,
        reference: Option<&str>,
    ) -> Result<RemoteContent> {
        let mut url = self.contents_url(location, path)?;
        if let Some(reference) = reference {
            url.query_pairs_mut().append_pair("ref", reference);
        }

        let response = self
            .send(Method::GET, url, None::<&()>, Access::Read, path)
            .await?;

        match response.json::<GitHubContents>().await? {
            GitHubContents::Listing(items) => Ok(RemoteContent::Listing(
                items
                    .into_iter()
                    .map(|item| RemoteFile::from(item).to_entry())
                    .collect(),
            )),
            GitHubContents::Item(item) => Ok(RemoteContent::File(item.into())),
        }
    }

    async fn put_content(
        &self,
        location: &RepositoryLocation,
        request: &PutContent,
    ) -> Result<WriteOutcome> {
        let url = self.contents_url(location, &request.path)?;
        let response = self
            .send(Method::PUT, url, Some(request), Access::Write, &request.path)
            .await?;
        let body: GitHubWriteResponse = response.json().await?;
        Ok(body.into())
    }

    async fn delete_content(
        &self,
        location: &RepositoryLocation,
        request: &DeleteContent,
    ) -> Result<WriteOutcome> {
        let url = self.contents_url(location, &request.path)?;
        let response = self
            .send(Method::DELETE, url, Some(request), Access::Write, &request.path)
            .await?;
        let body: GitHubWriteResponse = response.json().await?;
        Ok(body.into())
    }

    async fn get_blob(&self, location: &RepositoryLocation, sha: &str) -> Result<Bytes> {
        let url = self.blob_url(location, sha)?;
        let response = self
            .send(Method::GET, url, None::<&()>, Access::Read, sha)
            .await?;
        let blob: GitHubBlob = response.json().await?;
        match blob.encoding.as_str() {
            "base64" => decode_content(&blob.content),
            "utf-8" | "utf8" => Ok(Bytes::from(blob.content)),
            other => Err(BridgeError::invalid_structure(format!(
                "unsupported blob encoding {other:?} for {sha}"
            ))),
        }
    }

    async fn get_tree(
        &self,
        location: &RepositoryLocation,
        tree_ref: &str,
        recursive: bool,
    ) -> Result<TreeListing> {
        let mut url = self.tree_url(location, tree_ref)?;
        if recursive {
            url.query_pairs_mut().append_pair("recursive", "1");
        }

        let response = self
            .send(Method::GET, url, None::<&()>, Access::Read, tree_ref)
            .await?;
        let tree: GitHubTree = response.json().await?;
        if tree.truncated {
            warn!(repo = %location, tree_ref, "GitHub truncated the recursive tree listing");
        }

        Ok(TreeListing {
            sha: tree.sha,
            entries: tree.tree,
            truncated: tree.truncated,
        })
    }

    async fn get_repository(&self, location: &RepositoryLocation) -> Result<RepositoryInfo> {
        let url = self.repo_url(location, std::iter::empty())?;
        let path = location.to_string();
        let response = self
            .send(Method::GET, url, None::<&()>, Access::Read, &path)
            .await?;
        Ok(response.json().await?)
    }

    fn identifier(&self) -> String {
        format!("github+{}", self.base_url)
    }
}
