//! auramore-api: Shared types for the auramore mod system
//!
//! This crate defines the vocabulary shared between the mod host, the
//! presentation layer and mod authors: the manifest, the capability
//! vocabulary, lifecycle status and the guest ABI.

mod hash;
mod manifest;
mod permission;
mod status;

pub use hash::{ContentHash, PayloadHasher};
pub use manifest::{ModManifest, TargetApps, TargetOs};
pub use permission::{Permission, PermissionSet, UnknownPermission};
pub use status::{IllegalTransition, ModDetails, ModStatus, ModSummary, StatusEvent, StatusKind};

use serde::{Deserialize, Serialize};

/// Manifest schema version understood by this host
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Version of the closed capability vocabulary in [`Permission`]
pub const CAPABILITY_VOCABULARY_VERSION: u32 = 1;

/// Manifest file name at the package root
pub const MANIFEST_FILE: &str = "manifest.json";

/// Optional detached signature file at the package root
pub const SIGNATURE_FILE: &str = "signature.json";

/// Conventional package file extension
pub const PACKAGE_EXTENSION: &str = "amod";

/// Signature carried inside a package
///
/// `signature` is a base64 Ed25519 signature over the raw bytes of the
/// package [`ContentHash`], made with the publisher key named by `key_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    /// Identifier of the publisher key in the trusted key set
    pub key_id: String,

    /// Base64 encoded signature bytes
    pub signature: String,
}

/// Guest ABI between the sandbox runtime and a mod's entry module
pub mod abi {
    /// ABI version for compatibility checking
    pub const ABI_VERSION: u32 = 1;

    /// Import module name for host functions
    pub const HOST_MODULE: &str = "auramore";

    /// `request(capability: i32) -> i32`
    pub const IMPORT_REQUEST: &str = "request";

    /// `log(level: i32, ptr: i32, len: i32)`
    pub const IMPORT_LOG: &str = "log";

    /// Required export: `mod_init() -> i32`, non-zero means failure
    pub const EXPORT_INIT: &str = "mod_init";

    /// Optional export: `mod_tick()`, driven periodically by the host
    pub const EXPORT_TICK: &str = "mod_tick";

    /// Optional export: `mod_shutdown()`, called on detach
    pub const EXPORT_SHUTDOWN: &str = "mod_shutdown";

    /// Optional exported linear memory used by `log`
    pub const EXPORT_MEMORY: &str = "memory";

    /// Returned by `request` when the capability is granted
    pub const REQUEST_GRANTED: i32 = 0;

    /// Returned by `request` when the capability is refused
    pub const REQUEST_DENIED: i32 = -1;

    /// Returned by `request` for an id outside the vocabulary
    pub const REQUEST_UNKNOWN: i32 = -2;
}
