//! Publisher signatures over package content hashes

use crate::package::ModPackage;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a package signature did not verify
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("package is not signed")]
    Unsigned,

    #[error("signature file is unreadable: {0}")]
    Unreadable(String),

    #[error("key '{0}' is not trusted")]
    UntrustedKey(String),

    #[error("invalid signature encoding (expected base64)")]
    Encoding,

    #[error("invalid signature bytes: {0}")]
    Malformed(String),

    #[error("invalid trusted key '{key_id}': {reason}")]
    BadKey { key_id: String, reason: String },

    #[error("signature verification failed")]
    Mismatch,
}

/// Decode a base64 Ed25519 public key
pub fn decode_public_key(public_key_b64: &str) -> Result<VerifyingKey, String> {
    let raw = BASE64
        .decode(public_key_b64.trim())
        .map_err(|_| "invalid key encoding (expected base64)".to_string())?;
    let raw: [u8; 32] = raw
        .try_into()
        .map_err(|_| "invalid key length (expected 32 bytes)".to_string())?;
    VerifyingKey::from_bytes(&raw).map_err(|e| format!("invalid ed25519 public key: {}", e))
}

/// Encode a public key the way settings store it
pub fn encode_public_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.as_bytes())
}

/// Verify a package's signature against a trusted key set
///
/// `trusted_keys` maps key ids to base64 public keys.
pub fn verify_package(
    package: &ModPackage,
    trusted_keys: &BTreeMap<String, String>,
) -> Result<(), SignatureError> {
    if let Some(err) = package.signature_error() {
        return Err(SignatureError::Unreadable(err.to_string()));
    }
    let envelope = package.signature().ok_or(SignatureError::Unsigned)?;

    let key_b64 = trusted_keys
        .get(&envelope.key_id)
        .ok_or_else(|| SignatureError::UntrustedKey(envelope.key_id.clone()))?;
    let key = decode_public_key(key_b64).map_err(|reason| SignatureError::BadKey {
        key_id: envelope.key_id.clone(),
        reason,
    })?;

    let raw = BASE64
        .decode(envelope.signature.trim())
        .map_err(|_| SignatureError::Encoding)?;
    let signature =
        Signature::from_slice(&raw).map_err(|e| SignatureError::Malformed(e.to_string()))?;

    key.verify(&package.content_hash().digest_bytes(), &signature)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageBuilder;
    use ed25519_dalek::SigningKey;

    fn builder() -> PackageBuilder {
        PackageBuilder::new()
            .entry("manifest.json", "{}")
            .entry("mod.wat", "(module)")
    }

    fn read(bytes: Vec<u8>) -> ModPackage {
        ModPackage::from_bytes(&bytes, u64::MAX).unwrap()
    }

    fn trusted(id: &str, key: &SigningKey) -> BTreeMap<String, String> {
        BTreeMap::from([(id.to_string(), encode_public_key(&key.verifying_key()))])
    }

    #[test]
    fn test_valid_signature() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let package = read(builder().sign("publisher", &key).build().unwrap());
        assert_eq!(verify_package(&package, &trusted("publisher", &key)), Ok(()));
    }

    #[test]
    fn test_unsigned_and_untrusted() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let unsigned = read(builder().build().unwrap());
        assert_eq!(
            verify_package(&unsigned, &trusted("publisher", &key)),
            Err(SignatureError::Unsigned)
        );

        let signed = read(builder().sign("someone-else", &key).build().unwrap());
        assert!(matches!(
            verify_package(&signed, &trusted("publisher", &key)),
            Err(SignatureError::UntrustedKey(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = SigningKey::from_bytes(&[7u8; 32]);
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let package = read(builder().sign("publisher", &signer).build().unwrap());
        assert_eq!(
            verify_package(&package, &trusted("publisher", &other)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_tampered_content_fails() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let original = read(builder().sign("publisher", &key).build().unwrap());
        let signature = original.signature().cloned().unwrap();

        let tampered = read(
            PackageBuilder::new()
                .entry("manifest.json", "{}")
                .entry("mod.wat", "(module (func))")
                .entry("signature.json", serde_json::to_vec(&signature).unwrap())
                .build()
                .unwrap(),
        );
        assert_eq!(
            verify_package(&tampered, &trusted("publisher", &key)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_decode_public_key() {
        assert!(decode_public_key("not base64!").is_err());
        assert!(decode_public_key(&BASE64.encode([1u8; 16])).is_err());
        let key = SigningKey::from_bytes(&[1u8; 32]).verifying_key();
        assert_eq!(decode_public_key(&encode_public_key(&key)), Ok(key));
    }
}
