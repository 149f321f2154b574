//! Permission and trust policy
//!
//! [`evaluate`] is a pure function of the manifest, the package and a
//! [`PolicyConfig`] snapshot. The process-wide configuration lives in a
//! [`PolicyHandle`] that is only written at startup (`load`) and when the
//! settings file changes (`reload`).
//!
//! Checks run in order and the first failure decides the reason:
//!
//! | Check | Reason |
//! |-------|--------|
//! | signature (strict mode only) | `SignatureInvalid` |
//! | platform compatibility | `UnsupportedPlatform(<os>)` |
//! | allow-list and platform-only capabilities | `PermissionDenied(<token>)` |

mod presets;
mod signature;

pub use presets::PolicyPresets;
pub use signature::{decode_public_key, encode_public_key, verify_package, SignatureError};

use crate::package::ModPackage;
use auramore_api::{ModManifest, Permission, PermissionSet, TargetOs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Policy configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Require a verified publisher signature
    pub strict_mode: bool,

    /// Capabilities that may be granted
    pub allowed_permissions: PermissionSet,

    /// Trusted publisher keys: key id to base64 Ed25519 public key
    pub trusted_keys: BTreeMap<String, String>,

    /// Platform the host runs on
    pub host_platform: TargetOs,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyPresets::default_desktop()
    }
}

/// Default host platform; unknown platforms only accept `all` manifests
pub fn detect_platform() -> TargetOs {
    TargetOs::current().unwrap_or(TargetOs::All)
}

/// Why a policy check refused a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDenial {
    SignatureInvalid,
    UnsupportedPlatform(TargetOs),
    PermissionDenied(Permission),
}

impl PolicyDenial {
    /// Trust failures block install; permission denials only block enable
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, Self::SignatureInvalid | Self::UnsupportedPlatform(_))
    }
}

impl fmt::Display for PolicyDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureInvalid => f.write_str("SignatureInvalid"),
            Self::UnsupportedPlatform(os) => write!(f, "UnsupportedPlatform({})", os),
            Self::PermissionDenied(p) => write!(f, "PermissionDenied({})", p),
        }
    }
}

/// Result of a policy evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustDecision {
    pub allowed: bool,
    pub reason: String,
    pub signature_verified: bool,
    #[serde(skip)]
    pub denial: Option<PolicyDenial>,
}

impl TrustDecision {
    fn allow(signature_verified: bool) -> Self {
        Self {
            allowed: true,
            reason: "Allowed".to_string(),
            signature_verified,
            denial: None,
        }
    }

    fn deny(denial: PolicyDenial, signature_verified: bool) -> Self {
        Self {
            allowed: false,
            reason: denial.to_string(),
            signature_verified,
            denial: Some(denial),
        }
    }
}

/// Evaluate a manifest and its package against a policy snapshot
///
/// Deterministic: the same inputs always give the same decision.
pub fn evaluate(manifest: &ModManifest, package: &ModPackage, config: &PolicyConfig) -> TrustDecision {
    let signature = verify_package(package, &config.trusted_keys);
    let signature_verified = signature.is_ok();

    if config.strict_mode {
        if let Err(e) = signature {
            tracing::debug!(mod_id = %manifest.id, error = %e, "Signature check failed");
            return TrustDecision::deny(PolicyDenial::SignatureInvalid, signature_verified);
        }
    }

    if !manifest.supports_os(config.host_platform) {
        return TrustDecision::deny(
            PolicyDenial::UnsupportedPlatform(config.host_platform),
            signature_verified,
        );
    }

    if let Some(p) = first_denied(&manifest.permissions, config) {
        return TrustDecision::deny(PolicyDenial::PermissionDenied(p), signature_verified);
    }

    TrustDecision::allow(signature_verified)
}

/// Capabilities of a manifest that the policy grants
pub fn granted_permissions(manifest: &ModManifest, config: &PolicyConfig) -> PermissionSet {
    manifest
        .permissions
        .iter()
        .copied()
        .filter(|p| is_grantable(*p, config))
        .collect()
}

fn first_denied(requested: &PermissionSet, config: &PolicyConfig) -> Option<Permission> {
    requested.iter().copied().find(|p| !is_grantable(*p, config))
}

fn is_grantable(permission: Permission, config: &PolicyConfig) -> bool {
    config.allowed_permissions.contains(&permission) && permission.supported_on(config.host_platform)
}

/// Process-wide policy configuration
///
/// Cloning shares the same configuration. Readers take a snapshot and
/// evaluate against it, so a reload never changes a decision mid-way.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    inner: Arc<RwLock<Arc<PolicyConfig>>>,
}

impl PolicyHandle {
    /// Load the configuration at startup
    pub fn load(config: PolicyConfig) -> Self {
        tracing::info!(
            strict_mode = config.strict_mode,
            allowed = config.allowed_permissions.len(),
            trusted_keys = config.trusted_keys.len(),
            "Policy loaded"
        );
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Replace the configuration after a settings change
    pub fn reload(&self, config: PolicyConfig) {
        tracing::info!(
            strict_mode = config.strict_mode,
            allowed = config.allowed_permissions.len(),
            trusted_keys = config.trusted_keys.len(),
            "Policy reloaded"
        );
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }

    /// Current configuration snapshot
    pub fn snapshot(&self) -> Arc<PolicyConfig> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for PolicyHandle {
    fn default() -> Self {
        Self::load(PolicyConfig::default())
    }
}
