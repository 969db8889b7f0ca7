//! Tool-call surface for LLM function calling.
//!
//! A tool call arrives as a name plus loosely-typed JSON arguments. It is
//! turned into a [`ToolRequest`] and validated here, so the bridge itself
//! only ever sees typed arguments.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{
    bridge::{ContentBridge, DeleteRequest, UpsertRequest},
    encoding::{decode_content, encode_content},
    error::{BridgeError, ErrorKind, Result},
    types::{ContentRef, Identity, RepositoryLocation},
};

/// How `upsertFile` content is written in the call arguments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

/// One validated-at-the-boundary tool invocation
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool")]
pub enum ToolRequest {
    #[serde(rename = "listRepositoryFiles")]
    ListFiles {
        owner: String,
        repo: String,
        #[serde(default)]
        path: String,
        #[serde(rename = "ref", default)]
        reference: Option<String>,
    },

    #[serde(rename = "getRepositoryFileContent")]
    ReadFile {
        owner: String,
        repo: String,
        path: String,
        #[serde(rename = "ref", default)]
        reference: Option<String>,
    },

    #[serde(rename = "getRepositoryInfo")]
    RepoInfo { owner: String, repo: String },

    #[serde(rename = "listRepositoryTree")]
    ListTree {
        owner: String,
        repo: String,
        #[serde(rename = "ref", default)]
        reference: Option<String>,
    },

    #[serde(rename = "upsertFile", rename_all = "camelCase")]
    Upsert {
        owner: String,
        repo: String,
        path: String,
        content: String,
        message: String,
        #[serde(default)]
        content_encoding: ContentEncoding,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        expected_sha: Option<String>,
        #[serde(default)]
        author: Option<Identity>,
        #[serde(default)]
        committer: Option<Identity>,
    },

    #[serde(rename = "deleteFile")]
    Delete {
        owner: String,
        repo: String,
        path: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        branch: Option<String>,
    },
}

impl ToolRequest {
    /// Build a request from a tool name and its JSON arguments
    pub fn from_call(name: &str, arguments: Value) -> Result<Self> {
        let mut object = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(BridgeError::invalid_request(format!(
                    "arguments for {name} must be a JSON object, got {other}"
                )))
            }
        };
        object.insert("tool".to_string(), Value::String(name.to_string()));
        Self::from_value(Value::Object(object))
    }

    /// Parse a `{"tool": ..., ...}` object and validate it
    pub fn from_value(value: Value) -> Result<Self> {
        let request: Self = serde_json::from_value(value)
            .map_err(|e| BridgeError::invalid_request(format!("malformed tool call: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::ListFiles { .. } => "listRepositoryFiles",
            ToolRequest::ReadFile { .. } => "getRepositoryFileContent",
            ToolRequest::RepoInfo { .. } => "getRepositoryInfo",
            ToolRequest::ListTree { .. } => "listRepositoryTree",
            ToolRequest::Upsert { .. } => "upsertFile",
            ToolRequest::Delete { .. } => "deleteFile",
        }
    }

    fn location(&self) -> RepositoryLocation {
        match self {
            ToolRequest::ListFiles { owner, repo, .. }
            | ToolRequest::ReadFile { owner, repo, .. }
            | ToolRequest::RepoInfo { owner, repo }
            | ToolRequest::ListTree { owner, repo, .. }
            | ToolRequest::Upsert { owner, repo, .. }
            | ToolRequest::Delete { owner, repo, .. } => {
                RepositoryLocation::new(owner.trim(), repo.trim())
            }
        }
    }

    /// Reject calls the bridge could never satisfy, before any remote call
    pub fn validate(&self) -> Result<()> {
        let location = self.location();
        if location.owner.is_empty() || location.repo.is_empty() {
            return Err(BridgeError::invalid_request(format!(
                "{}: owner and repo are required",
                self.name()
            )));
        }

        match self {
            ToolRequest::ReadFile { path, .. } | ToolRequest::Delete { path, .. } => {
                require_non_blank(self.name(), "path", path)
            }
            ToolRequest::Upsert {
                path,
                message,
                content,
                content_encoding,
                ..
            } => {
                require_non_blank(self.name(), "path", path)?;
                require_non_blank(self.name(), "message", message)?;
                if *content_encoding == ContentEncoding::Base64 {
                    decode_content(content).map_err(|_| {
                        BridgeError::invalid_request("upsertFile: content is not valid base64")
                    })?;
                }
                Ok(())
            }
            ToolRequest::ListFiles { .. }
            | ToolRequest::RepoInfo { .. }
            | ToolRequest::ListTree { .. } => Ok(()),
        }
    }

    /// Run the call against `bridge`, shaping the result as JSON for the model
    pub async fn invoke(self, bridge: &ContentBridge) -> Result<Value> {
        let location = self.location();
        let repository = location.to_string();
        debug!(tool = self.name(), repo = %repository, "invoking tool");

        match self {
            ToolRequest::ListFiles { path, reference, .. } => {
                let target = ContentRef::new(&path).with_reference(reference.clone());
                let listing = bridge.list_directory(&location, &target).await?;
                let shown_path = if listing.path.is_empty() {
                    "/".to_string()
                } else {
                    listing.path
                };
                let shown_ref = reference
                    .as_deref()
                    .or(bridge.default_branch())
                    .unwrap_or("default")
                    .to_string();
                let count = listing.entries.len();
                Ok(json!({
                    "repository": repository,
                    "path": shown_path,
                    "ref": shown_ref,
                    "count": count,
                    "files": listing.entries,
                }))
            }
            ToolRequest::ReadFile { path, reference, .. } => {
                let target = ContentRef::new(&path).with_reference(reference.clone());
                let file = bridge.read_file(&location, &target).await?;
                let (content, content_encoding) = match file.text() {
                    Some(text) => (text.to_string(), "utf-8"),
                    None => (encode_content(&file.content), "base64"),
                };
                let shown_ref = reference.or_else(|| bridge.default_branch().map(str::to_string));
                Ok(json!({
                    "repository": repository,
                    "path": file.path,
                    "ref": shown_ref,
                    "name": file.name,
                    "size": file.size,
                    "sha": file.sha,
                    "encoding": file.encoding,
                    "html_url": file.source_url,
                    "contentEncoding": content_encoding,
                    "content": content,
                }))
            }
            ToolRequest::RepoInfo { .. } => {
                let info = bridge.repository_info(&location).await?;
                Ok(json!({
                    "repository": repository,
                    "name": info.name,
                    "full_name": info.full_name,
                    "description": info.description,
                    "default_branch": info.default_branch,
                    "private": info.private,
                    "visibility": info.visibility,
                    "size": info.size,
                    "html_url": info.html_url,
                }))
            }
            ToolRequest::ListTree { reference, .. } => {
                let tree = bridge.list_tree_recursive(&location, reference.as_deref()).await?;
                let shown_ref = reference
                    .as_deref()
                    .or(bridge.default_branch())
                    .unwrap_or("HEAD")
                    .to_string();
                let count = tree.entries.len();
                Ok(json!({
                    "repository": repository,
                    "ref": shown_ref,
                    "sha": tree.sha,
                    "count": count,
                    "truncated": tree.truncated,
                    "tree": tree.entries,
                }))
            }
            ToolRequest::Upsert {
                path,
                content,
                message,
                content_encoding,
                branch,
                expected_sha,
                author,
                committer,
                ..
            } => {
                let bytes = match content_encoding {
                    ContentEncoding::Utf8 => Bytes::from(content),
                    ContentEncoding::Base64 => decode_content(&content)?,
                };
                let request = UpsertRequest {
                    path: path.clone(),
                    content: bytes,
                    message,
                    branch: branch.clone(),
                    expected_sha,
                    author,
                    committer,
                };
                let outcome = bridge.upsert_file(&location, request).await?;
                let shown_branch = branch.or_else(|| bridge.default_branch().map(str::to_string));
                Ok(json!({
                    "repository": repository,
                    "path": path,
                    "branch": shown_branch,
                    "commit": { "sha": outcome.commit_sha, "html_url": outcome.commit_url },
                    "content": { "sha": outcome.content_sha },
                }))
            }
            ToolRequest::Delete {
                path,
                message,
                branch,
                ..
            } => {
                let request = DeleteRequest {
                    path: path.clone(),
                    message,
                    branch: branch.clone(),
                };
                let outcome = bridge.delete_file(&location, request).await?;
                let shown_branch = branch.or_else(|| bridge.default_branch().map(str::to_string));
                Ok(json!({
                    "repository": repository,
                    "path": path,
                    "branch": shown_branch,
                    "commit": { "sha": outcome.commit_sha, "html_url": outcome.commit_url },
                    "content": Value::Null,
                }))
            }
        }
    }
}

fn require_non_blank(tool: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().trim_matches('/').is_empty() {
        return Err(BridgeError::invalid_request(format!("{tool}: {field} is required")));
    }
    Ok(())
}

/// HTTP-style status for an error kind, for handlers that front the bridge
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound => 404,
        ErrorKind::NotAFile | ErrorKind::InvalidRequest => 400,
        ErrorKind::TooLarge => 413,
        ErrorKind::Conflict => 409,
        ErrorKind::RateLimited => 429,
        ErrorKind::Unauthorized => 401,
        ErrorKind::Timeout => 504,
        ErrorKind::RemoteError | ErrorKind::Transport => 502,
        ErrorKind::Internal => 500,
    }
}

/// JSON rendering of a failure, handed back to the model as the tool result
pub fn error_payload(err: &BridgeError) -> Value {
    let kind = err.kind();
    let mut error = json!({
        "kind": kind,
        "message": err.to_string(),
        "status": status_for(kind),
        "retryable": err.is_retryable(),
    });
    if let BridgeError::Remote { status, .. } = err {
        error["remoteStatus"] = json!(status);
    }
    json!({ "error": error })
}

fn repo_properties() -> Map<String, Value> {
    let mut props = Map::new();
    props.insert(
        "owner".into(),
        json!({ "type": "string", "description": "Repository owner (username or organization)" }),
    );
    props.insert(
        "repo".into(),
        json!({ "type": "string", "description": "Repository name" }),
    );
    props
}

fn definition(name: &str, description: &str, extra: Value, required: &[&str]) -> Value {
    let mut properties = repo_properties();
    if let Value::Object(extra) = extra {
        properties.extend(extra);
    }
    json!({
        "name": name,
        "description": description,
        "parameters": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

/// JSON-schema definitions for every tool, in the shape function-calling APIs expect
pub fn tool_definitions() -> Vec<Value> {
    let identity = json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "email": { "type": "string" }
        },
        "required": ["name", "email"]
    });

    vec![
        definition(
            "listRepositoryFiles",
            "List files in a GitHub repository directory",
            json!({
                "path": { "type": "string", "description": "Directory path within the repository", "default": "" },
                "ref": { "type": "string", "description": "Branch, tag or commit SHA" }
            }),
            &["owner", "repo"],
        ),
        definition(
            "getRepositoryFileContent",
            "Get the content of a file from a GitHub repository, with the sha needed to update it",
            json!({
                "path": { "type": "string", "description": "File path within the repository" },
                "ref": { "type": "string", "description": "Branch, tag or commit SHA" }
            }),
            &["owner", "repo", "path"],
        ),
        definition(
            "getRepositoryInfo",
            "Get information about a GitHub repository, including its default branch",
            json!({}),
            &["owner", "repo"],
        ),
        definition(
            "listRepositoryTree",
            "List every file and directory in a repository without downloading content",
            json!({
                "ref": { "type": "string", "description": "Branch, tag or commit SHA" }
            }),
            &["owner", "repo"],
        ),
        definition(
            "upsertFile",
            "Create or update a file in a GitHub repository. On a conflict, re-read the file and retry with its sha",
            json!({
                "path": { "type": "string", "description": "File path within the repository" },
                "content": { "type": "string", "description": "New file content" },
                "contentEncoding": { "type": "string", "enum": ["utf-8", "base64"], "default": "utf-8" },
                "message": { "type": "string", "description": "Commit message" },
                "branch": { "type": "string", "description": "Branch name" },
                "expectedSha": { "type": "string", "description": "Sha of the version being replaced (optimistic concurrency)" },
                "author": identity.clone(),
                "committer": identity
            }),
            &["owner", "repo", "path", "content", "message"],
        ),
        definition(
            "deleteFile",
            "Delete a file from a GitHub repository",
            json!({
                "path": { "type": "string", "description": "File path within the repository" },
                "message": { "type": "string", "description": "Commit message" },
                "branch": { "type": "string", "description": "Branch name" }
            }),
            &["owner", "repo", "path"],
        ),
    ]
}
