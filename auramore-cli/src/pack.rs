//! Package authoring helpers: `pack` and `keygen`

use anyhow::{bail, Context, Result};
use auramore_api::{MANIFEST_FILE, SIGNATURE_FILE};
use auramore_host::policy::encode_public_key;
use auramore_host::PackageBuilder;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::fs;
use std::path::Path;

/// Fresh publisher key pair, base64 encoded
pub struct KeyPair {
    pub secret: String,
    pub public: String,
}

pub fn generate_key() -> KeyPair {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = SigningKey::from_bytes(&bytes);
    KeyPair {
        secret: BASE64.encode(key.to_bytes()),
        public: encode_public_key(&key.verifying_key()),
    }
}

/// Read a base64 secret key written by `keygen`
pub fn read_signing_key(path: &Path) -> Result<SigningKey> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read signing key {}", path.display()))?;
    let bytes = BASE64
        .decode(text.trim())
        .context("Signing key is not valid base64")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| anyhow::anyhow!("Signing key must be 32 bytes, got {}", v.len()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Build a package from a directory holding `manifest.json` and the mod files
pub fn pack_dir(dir: &Path, signer: Option<(&str, &SigningKey)>) -> Result<Vec<u8>> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest: serde_json::Value = serde_json::from_slice(
        &fs::read(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?,
    )
    .with_context(|| format!("{} is not valid JSON", manifest_path.display()))?;

    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;

    let mut builder = PackageBuilder::new().manifest(&manifest);
    for (name, path) in files {
        if name == MANIFEST_FILE || name == SIGNATURE_FILE {
            continue;
        }
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        builder = builder.entry(name, bytes);
    }
    if let Some((key_id, key)) = signer {
        builder = builder.sign(key_id, key);
    }

    Ok(builder.build()?)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, std::path::PathBuf)>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path.strip_prefix(root)?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join("/"));
            match name {
                Some(name) => out.push((name, path)),
                None => bail!("Non UTF-8 file name: {}", path.display()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use auramore_host::ModPackage;
    use serde_json::json;

    fn mod_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let manifest = json!({
            "schema_version": 1,
            "id": "clock",
            "name": "Clock",
            "version": "1.0.0",
            "author": "Aura",
            "description": "Clock widget",
            "target_os": ["all"],
            "target_apps": ["all"],
            "permissions": [],
            "entry_point": "bin/mod.wat"
        });
        fs::write(dir.path().join(MANIFEST_FILE), manifest.to_string()).unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin").join("mod.wat"), "(module)").unwrap();
        dir
    }

    #[test]
    fn test_pack_dir() {
        let dir = mod_dir();
        let bytes = pack_dir(dir.path(), None).unwrap();

        let package = ModPackage::from_bytes(&bytes, u64::MAX).unwrap();
        assert!(package.contains("bin/mod.wat"));
        assert!(package.manifest_bytes().is_some());
        assert!(package.signature().is_none());
    }

    #[test]
    fn test_pack_signed_with_generated_key() {
        let dir = mod_dir();
        let pair = generate_key();
        let keys = tempfile::tempdir().unwrap();
        let key_path = keys.path().join("publisher.key");
        fs::write(&key_path, &pair.secret).unwrap();

        let key = read_signing_key(&key_path).unwrap();
        assert_eq!(encode_public_key(&key.verifying_key()), pair.public);

        let bytes = pack_dir(dir.path(), Some(("aura", &key))).unwrap();
        let package = ModPackage::from_bytes(&bytes, u64::MAX).unwrap();
        assert_eq!(package.signature().unwrap().key_id, "aura");
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(pack_dir(dir.path(), None).is_err());
    }
}
