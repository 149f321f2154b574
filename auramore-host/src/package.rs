//! Mod package archives
//!
//! A package is a ZIP archive holding `manifest.json`, the entry module and
//! any resources, plus an optional `signature.json`. The archive is read
//! fully into memory; nothing is extracted to disk.
//!
//! ```text
//! demo.amod
//! ├── manifest.json      identity, targets, permissions, entry_point
//! ├── signature.json     { key_id, signature }  (excluded from the hash)
//! ├── mod.wasm           entry point
//! └── assets/...
//! ```

use auramore_api::{ContentHash, PayloadHasher, SignatureEnvelope, MANIFEST_FILE, SIGNATURE_FILE};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use thiserror::Error;

/// Default ceiling on the uncompressed size of a package
pub const DEFAULT_MAX_PACKAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Errors that can occur while reading a package archive
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Package is not a valid archive: {0}")]
    Archive(#[source] zip::result::ZipError),

    #[error("Failed to read archive entry '{name}': {source}")]
    Entry {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsafe archive entry name: {0}")]
    UnsafeEntry(String),

    #[error("Duplicate archive entry: {0}")]
    DuplicateEntry(String),

    #[error("Package exceeds size limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Malformed signature file: {0}")]
    Signature(#[source] serde_json::Error),

    #[error("Failed to write archive: {0}")]
    Write(String),
}

/// Why a relative path was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRejection {
    Empty,
    Absolute,
    Escapes,
}

/// Normalize a package-relative path lexically
///
/// Backslashes count as separators, `.` segments are dropped and `..`
/// pops the previous segment. Absolute paths, drive prefixes and any `..`
/// that would climb above the package root are rejected.
pub fn normalize_relative(path: &str) -> Result<String, PathRejection> {
    let unified = path.replace('\\', "/");

    if unified.trim().is_empty() {
        return Err(PathRejection::Empty);
    }
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(PathRejection::Absolute);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathRejection::Escapes);
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(PathRejection::Empty);
    }
    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// A package archive loaded into memory
#[derive(Debug, Clone)]
pub struct ModPackage {
    entries: BTreeMap<String, Vec<u8>>,
    signature: Option<SignatureEnvelope>,
    signature_error: Option<String>,
    content_hash: ContentHash,
}

impl ModPackage {
    /// Read a package from raw archive bytes
    ///
    /// A `signature.json` that cannot be parsed does not fail the read; the
    /// package is treated as unsigned and the parse error is kept for the
    /// trust policy to report.
    pub fn from_bytes(bytes: &[u8], max_bytes: u64) -> Result<Self, PackageError> {
        if bytes.len() as u64 > max_bytes {
            return Err(PackageError::TooLarge { limit: max_bytes });
        }

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(PackageError::Archive)?;
        let mut entries = BTreeMap::new();
        let mut total: u64 = 0;

        for index in 0..archive.len() {
            let file = archive.by_index(index).map_err(PackageError::Archive)?;
            if file.is_dir() {
                continue;
            }

            let raw_name = file.name().to_string();
            let name = normalize_relative(&raw_name)
                .map_err(|_| PackageError::UnsafeEntry(raw_name.clone()))?;

            // Declared sizes can lie; bound the actual read instead
            let remaining = max_bytes.saturating_sub(total);
            let mut data = Vec::new();
            file.take(remaining.saturating_add(1))
                .read_to_end(&mut data)
                .map_err(|source| PackageError::Entry {
                    name: raw_name.clone(),
                    source,
                })?;
            total += data.len() as u64;
            if total > max_bytes {
                return Err(PackageError::TooLarge { limit: max_bytes });
            }

            if entries.insert(name.clone(), data).is_some() {
                return Err(PackageError::DuplicateEntry(name));
            }
        }

        let (signature, signature_error) = match entries.remove(SIGNATURE_FILE) {
            Some(raw) => match serde_json::from_slice::<SignatureEnvelope>(&raw) {
                Ok(envelope) => (Some(envelope), None),
                Err(e) => (None, Some(PackageError::Signature(e).to_string())),
            },
            None => (None, None),
        };

        let content_hash = hash_entries(&entries);

        Ok(Self {
            entries,
            signature,
            signature_error,
            content_hash,
        })
    }

    /// Bytes of `manifest.json`, if present
    pub fn manifest_bytes(&self) -> Option<&[u8]> {
        self.entry(MANIFEST_FILE)
    }

    /// Bytes of a normalized entry
    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Normalized entry names in hash order
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn signature(&self) -> Option<&SignatureEnvelope> {
        self.signature.as_ref()
    }

    /// Parse error of a present but unreadable `signature.json`
    pub fn signature_error(&self) -> Option<&str> {
        self.signature_error.as_deref()
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }
}

fn hash_entries(entries: &BTreeMap<String, Vec<u8>>) -> ContentHash {
    let mut hasher = PayloadHasher::new();
    for (name, bytes) in entries {
        hasher.add_entry(name, bytes);
    }
    hasher.finish()
}

/// Builder for package archives
///
/// Used by mod authors (`auramore pack`) and by tests.
///
/// ```rust,ignore
/// let bytes = PackageBuilder::new()
///     .manifest(&serde_json::json!({ "id": "demo", /* ... */ }))
///     .entry("mod.wat", wat_source)
///     .sign("publisher-1", &signing_key)
///     .build()?;
/// ```
#[derive(Default)]
pub struct PackageBuilder {
    entries: BTreeMap<String, Vec<u8>>,
    raw_entries: Vec<(String, Vec<u8>)>,
    signer: Option<(String, SigningKey)>,
    error: Option<String>,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `manifest.json` from any serializable value
    ///
    /// A value that fails to serialize is reported by [`build`](Self::build).
    pub fn manifest(mut self, manifest: &impl serde::Serialize) -> Self {
        match serde_json::to_vec_pretty(manifest) {
            Ok(bytes) => self.entry(MANIFEST_FILE, bytes),
            Err(e) => {
                self.error = Some(format!("manifest: {e}"));
                self
            }
        }
    }

    /// Add a file; the name is stored as given
    pub fn entry(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(name.into(), bytes.into());
        self
    }

    /// Add an entry whose name bypasses normalization (for crafting bad archives)
    pub fn raw_entry(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.raw_entries.push((name.into(), bytes.into()));
        self
    }

    /// Sign the content hash with a publisher key
    pub fn sign(mut self, key_id: impl Into<String>, key: &SigningKey) -> Self {
        self.signer = Some((key_id.into(), key.clone()));
        self
    }

    /// Content hash the built package will have
    pub fn content_hash(&self) -> ContentHash {
        let normalized: BTreeMap<String, Vec<u8>> = self
            .entries
            .iter()
            .filter(|(name, _)| name.as_str() != SIGNATURE_FILE)
            .map(|(name, bytes)| {
                let key = normalize_relative(name).unwrap_or_else(|_| name.clone());
                (key, bytes.clone())
            })
            .collect();
        hash_entries(&normalized)
    }

    /// Serialize the archive
    pub fn build(self) -> Result<Vec<u8>, PackageError> {
        if let Some(error) = self.error {
            return Err(PackageError::Write(error));
        }
        let mut entries = self.entries.clone();
        if let Some((key_id, key)) = &self.signer {
            let hash = self.content_hash();
            let signature = key.sign(&hash.digest_bytes());
            let envelope = SignatureEnvelope {
                key_id: key_id.clone(),
                signature: BASE64.encode(signature.to_bytes()),
            };
            let json = serde_json::to_vec(&envelope).map_err(PackageError::Signature)?;
            entries.insert(SIGNATURE_FILE.to_string(), json);
        }

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        let all = entries.into_iter().chain(self.raw_entries);

        for (name, bytes) in all {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| PackageError::Write(e.to_string()))?;
            writer
                .write_all(&bytes)
                .map_err(|e| PackageError::Write(e.to_string()))?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| PackageError::Write(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative("mod.wasm").as_deref(), Ok("mod.wasm"));
        assert_eq!(normalize_relative("./bin/mod.wasm").as_deref(), Ok("bin/mod.wasm"));
        assert_eq!(normalize_relative("bin\\mod.wasm").as_deref(), Ok("bin/mod.wasm"));
        assert_eq!(normalize_relative("bin/../mod.wasm").as_deref(), Ok("mod.wasm"));
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        assert_eq!(normalize_relative("../mod.wasm"), Err(PathRejection::Escapes));
        assert_eq!(normalize_relative("bin/../../x"), Err(PathRejection::Escapes));
        assert_eq!(normalize_relative("..\\..\\evil.dll"), Err(PathRejection::Escapes));
        assert_eq!(normalize_relative("/etc/passwd"), Err(PathRejection::Absolute));
        assert_eq!(normalize_relative("C:\\evil.dll"), Err(PathRejection::Absolute));
        assert_eq!(normalize_relative("./."), Err(PathRejection::Empty));
        assert_eq!(normalize_relative(""), Err(PathRejection::Empty));
    }

    #[test]
    fn test_read_built_package() {
        let bytes = PackageBuilder::new()
            .entry(MANIFEST_FILE, b"{}".to_vec())
            .entry("bin/mod.wat", b"(module)".to_vec())
            .build()
            .unwrap();

        let package = ModPackage::from_bytes(&bytes, DEFAULT_MAX_PACKAGE_BYTES).unwrap();
        assert_eq!(package.manifest_bytes(), Some(&b"{}"[..]));
        assert!(package.contains("bin/mod.wat"));
        assert!(package.signature().is_none());
    }

    #[test]
    fn test_signature_excluded_from_hash() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let builder = || {
            PackageBuilder::new()
                .entry(MANIFEST_FILE, b"{}".to_vec())
                .entry("mod.wat", b"(module)".to_vec())
        };

        let unsigned = ModPackage::from_bytes(&builder().build().unwrap(), u64::MAX).unwrap();
        let signed =
            ModPackage::from_bytes(&builder().sign("k", &key).build().unwrap(), u64::MAX).unwrap();

        assert_eq!(unsigned.content_hash(), signed.content_hash());
        assert_eq!(signed.signature().map(|s| s.key_id.as_str()), Some("k"));
        assert_eq!(builder().content_hash(), *signed.content_hash());
    }

    #[test]
    fn test_rejects_traversal_entry() {
        let bytes = PackageBuilder::new()
            .entry(MANIFEST_FILE, b"{}".to_vec())
            .raw_entry("../outside.txt", b"x".to_vec())
            .build()
            .unwrap();

        let err = ModPackage::from_bytes(&bytes, u64::MAX).unwrap_err();
        assert!(matches!(err, PackageError::UnsafeEntry(_)));
    }

    #[test]
    fn test_size_limit() {
        let bytes = PackageBuilder::new()
            .entry("big.bin", vec![0u8; 4096])
            .build()
            .unwrap();

        let err = ModPackage::from_bytes(&bytes, 1024).unwrap_err();
        assert!(matches!(err, PackageError::TooLarge { .. }));
    }

    #[test]
    fn test_unbounded_limit_reads_every_entry() {
        let bytes = PackageBuilder::new()
            .entry(MANIFEST_FILE, b"{\"id\":\"clock\"}".to_vec())
            .entry("bin/mod.wat", b"(module)".to_vec())
            .build()
            .unwrap();

        let package = ModPackage::from_bytes(&bytes, u64::MAX).unwrap();
        assert_eq!(package.manifest_bytes(), Some(&b"{\"id\":\"clock\"}"[..]));
        assert_eq!(package.entry("bin/mod.wat"), Some(&b"(module)"[..]));
    }

    #[test]
    fn test_unserializable_manifest_fails_build() {
        use std::collections::HashMap;

        // JSON object keys must be strings
        let mut manifest = HashMap::new();
        manifest.insert((1u8, 2u8), "x");

        let err = PackageBuilder::new().manifest(&manifest).build().unwrap_err();
        assert!(matches!(err, PackageError::Write(_)));
    }

    #[test]
    fn test_garbage_is_not_an_archive() {
        let err = ModPackage::from_bytes(b"definitely not a zip", u64::MAX).unwrap_err();
        assert!(matches!(err, PackageError::Archive(_)));
    }
}
