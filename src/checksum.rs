//! Checksum utilities for compiled schema fingerprints

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 checksum of compiled schema content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum over the JSON encoding of a value
    ///
    /// Mapping order is part of the encoding, so equal inputs compiled the
    /// same way always hash the same.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        let canonical = serde_json::to_vec(value).unwrap_or_default();
        Self::from_bytes(&canonical)
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs and summaries
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let value = serde_json::json!({"name": "Orders", "measures": ["count"]});
        assert_eq!(Checksum::from_serialize(&value), Checksum::from_serialize(&value));
        assert_eq!(Checksum::from_serialize(&value).as_str().len(), 64);
    }

    #[test]
    fn test_checksum_different_content() {
        let first = Checksum::from_serialize(&serde_json::json!({"name": "Orders"}));
        let second = Checksum::from_serialize(&serde_json::json!({"name": "Users"}));
        assert_ne!(first, second);
    }

    #[test]
    fn test_known_digest() {
        let checksum = Checksum::from_bytes(b"");
        assert_eq!(
            checksum.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(checksum.short(), "e3b0c44298fc");
    }
}
