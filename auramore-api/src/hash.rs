//! Content addressing for mod packages

use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 hash of a package's canonical payload, lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a hex digest
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex)
            .ok()
            .map(|h| Self(h.to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 32 digest bytes (the message signed by publishers)
    pub fn digest_bytes(&self) -> [u8; 32] {
        // The inner string is only ever built from a valid digest
        blake3::Hash::from_hex(&self.0)
            .map(|h| *h.as_bytes())
            .unwrap_or([0u8; 32])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid content hash: {}", value))
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

/// Incremental hasher over package entries
///
/// Entries must be fed in ascending name order. Each entry contributes its
/// name, a zero separator, its length (u64 little endian) and its bytes, so
/// moving bytes between entries changes the digest.
pub struct PayloadHasher {
    hasher: blake3::Hasher,
}

impl PayloadHasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    pub fn add_entry(&mut self, name: &str, bytes: &[u8]) -> &mut Self {
        self.hasher.update(name.as_bytes());
        self.hasher.update(&[0u8]);
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn finish(&self) -> ContentHash {
        ContentHash(self.hasher.finalize().to_hex().to_string())
    }
}

impl Default for PayloadHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_boundaries_matter() {
        let a = PayloadHasher::new()
            .add_entry("a", b"xy")
            .add_entry("b", b"z")
            .finish();
        let b = PayloadHasher::new()
            .add_entry("a", b"x")
            .add_entry("b", b"yz")
            .finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = PayloadHasher::new().add_entry("manifest.json", b"{}").finish();
        assert_eq!(hash.as_str().len(), 64);
        assert_eq!(ContentHash::from_hex(hash.as_str()), Some(hash.clone()));
        assert_ne!(hash.digest_bytes(), [0u8; 32]);
        assert!(ContentHash::from_hex("not-hex").is_none());
    }
}
