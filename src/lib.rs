pub mod bridge;
pub mod config;
pub mod encoding;
pub mod error;
pub mod github;
pub mod memory;
pub mod store;
pub mod tool;
pub mod types;

pub use bridge::{ContentBridge, DeleteRequest, UpsertRequest};
pub use config::BridgeConfig;
pub use error::{BridgeError, ErrorKind, Result};
pub use github::GitHubStore;
pub use memory::MemoryStore;
pub use store::{ContentStore, DeleteContent, PutContent, RemoteContent, RemoteFile};
pub use tool::{error_payload, tool_definitions, ContentEncoding, ToolRequest};
pub use types::{
    ContentRef, DirectoryEntry, DirectoryListing, EntryType, FileSnapshot, Identity,
    RepositoryInfo, RepositoryLocation, TreeEntry, TreeEntryType, TreeListing, WriteOutcome,
};
