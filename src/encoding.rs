//! Transfer encoding and path helpers shared by the stores and the bridge.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;

use crate::error::{BridgeError, Result};

/// Encode raw bytes for the contents API; binary input is fine
pub fn encode_content(content: &[u8]) -> String {
    STANDARD.encode(content)
}

/// Decode base64 as served by the contents API
///
/// GitHub wraps the payload at 60 columns, so whitespace is stripped first.
pub fn decode_content(encoded: &str) -> Result<Bytes> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map(Bytes::from)
        .map_err(|e| BridgeError::invalid_structure(format!("content is not valid base64: {e}")))
}

/// Strip leading and trailing slashes; `""` is the repository root
pub fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

/// Normalize a path that must name something below the root
pub(crate) fn require_path(path: &str) -> Result<String> {
    let normalized = normalize_path(path);
    if normalized.is_empty() {
        return Err(BridgeError::invalid_request("a file path is required"));
    }
    if normalized.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(BridgeError::invalid_request(format!(
            "path {path:?} contains empty or relative segments"
        )));
    }
    Ok(normalized)
}

/// Last path segment
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wrapped_base64() {
        let wrapped = "eyJh\nIjox\nfQ==\n";
        assert_eq!(decode_content(wrapped).unwrap(), Bytes::from_static(b"{\"a\":1}"));
    }

    #[test]
    fn test_binary_content_survives() {
        let raw = [0u8, 159, 146, 150, 255, 10];
        let decoded = decode_content(&encode_content(&raw)).unwrap();
        assert_eq!(&decoded[..], &raw[..]);
    }

    #[test]
    fn test_invalid_base64_is_structure_error() {
        assert!(matches!(
            decode_content("not base64!!"),
            Err(BridgeError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("///src/"), "src");
        assert_eq!(normalize_path("src/main.rs"), "src/main.rs");
    }

    #[test]
    fn test_require_path() {
        assert_eq!(require_path("/src/config.json").unwrap(), "src/config.json");
        assert!(require_path("/").is_err());
        assert!(require_path("src//a").is_err());
        assert!(require_path("src/../secret").is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("src/config.json"), "config.json");
        assert_eq!(file_name("README.md"), "README.md");
    }
}
