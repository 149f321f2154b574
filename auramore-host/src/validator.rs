//! Manifest validation
//!
//! Turns untrusted package bytes into a [`ModManifest`]. Checks run in a
//! fixed order and the first failure wins:
//!
//! 1. manifest present, well formed, known schema version
//! 2. required fields present and non-empty
//! 3. target platforms and applications
//! 4. entry point stays inside the package and exists
//! 5. permissions belong to the capability vocabulary
//!
//! Validation is pure: it reads nothing but the given bytes.

use crate::package::{normalize_relative, ModPackage, PackageError, PathRejection};
use auramore_api::{
    ModManifest, Permission, PermissionSet, TargetApps, TargetOs, MANIFEST_SCHEMA_VERSION,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use thiserror::Error;

const MAX_ID_LEN: usize = 64;

/// Errors produced while validating a package manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("MalformedManifest: {0}")]
    Malformed(String),

    #[error("MalformedManifest: {0}")]
    Package(#[from] PackageError),

    #[error("UnsupportedSchema: expected {expected}, found {found}")]
    UnsupportedSchema { expected: u32, found: u32 },

    #[error("InvalidEntryPoint: '{0}' resolves outside the package")]
    InvalidEntryPoint(String),

    #[error("MissingEntryPoint: '{0}' not found in package")]
    MissingEntryPoint(String),

    #[error("UnknownPermission: {0}")]
    UnknownPermission(String),
}

impl ManifestError {
    /// Stable error code for callers and the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) | Self::Package(_) => "MalformedManifest",
            Self::UnsupportedSchema { .. } => "UnsupportedSchema",
            Self::InvalidEntryPoint(_) => "InvalidEntryPoint",
            Self::MissingEntryPoint(_) => "MissingEntryPoint",
            Self::UnknownPermission(_) => "UnknownPermission",
        }
    }

    fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Manifest as written by the author, before any check
#[derive(Debug, Deserialize)]
struct RawManifest {
    schema_version: Option<u32>,
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    author: Option<String>,
    description: Option<String>,
    target_os: Option<Vec<String>>,
    target_apps: Option<Vec<String>>,
    #[serde(default)]
    permissions: Vec<String>,
    entry_point: Option<String>,
}

/// A package whose manifest passed every check
#[derive(Debug, Clone)]
pub struct ValidatedPackage {
    pub manifest: ModManifest,
    pub package: ModPackage,
}

/// Read and validate raw package bytes
pub fn validate_package(bytes: &[u8], max_bytes: u64) -> Result<ValidatedPackage, ManifestError> {
    let package = ModPackage::from_bytes(bytes, max_bytes)?;
    let manifest = validate_manifest(&package)?;
    Ok(ValidatedPackage { manifest, package })
}

/// Validate the manifest of an already-read package
pub fn validate_manifest(package: &ModPackage) -> Result<ModManifest, ManifestError> {
    // (a) well formed and schema
    let bytes = package
        .manifest_bytes()
        .ok_or_else(|| ManifestError::malformed("manifest.json not found"))?;
    let raw: RawManifest = serde_json::from_slice(bytes)
        .map_err(|e| ManifestError::malformed(format!("invalid manifest json: {}", e)))?;

    let schema_version = raw.schema_version.unwrap_or(MANIFEST_SCHEMA_VERSION);
    if schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(ManifestError::UnsupportedSchema {
            expected: MANIFEST_SCHEMA_VERSION,
            found: schema_version,
        });
    }

    // (b) required fields
    let id = required("id", raw.id)?;
    validate_id(&id)?;
    let name = required("name", raw.name)?;
    let version_text = required("version", raw.version)?;
    let version = semver::Version::parse(&version_text)
        .map_err(|e| ManifestError::malformed(format!("invalid version '{}': {}", version_text, e)))?;
    let author = required("author", raw.author)?;
    let description = required("description", raw.description)?;
    let entry_point = required("entry_point", raw.entry_point)?;

    // (c) targets
    let target_os = parse_target_os(raw.target_os)?;
    let target_apps = TargetApps::try_from(raw.target_apps.unwrap_or_default())
        .map_err(ManifestError::Malformed)?;

    // (d) entry point
    let entry_point = resolve_entry_point(package, &entry_point)?;

    // (e) permissions
    let permissions = parse_permissions(&raw.permissions)?;

    Ok(ModManifest {
        schema_version,
        id,
        name,
        version,
        author,
        description,
        target_os,
        target_apps,
        permissions,
        entry_point,
    })
}

fn required(field: &str, value: Option<String>) -> Result<String, ManifestError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(ManifestError::malformed(format!("field '{}' is empty", field))),
        None => Err(ManifestError::malformed(format!("missing field '{}'", field))),
    }
}

fn validate_id(id: &str) -> Result<(), ManifestError> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    let starts_ok = id
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);

    if id.len() > MAX_ID_LEN || !valid_chars || !starts_ok {
        return Err(ManifestError::malformed(format!("invalid mod id '{}'", id)));
    }
    Ok(())
}

fn parse_target_os(raw: Option<Vec<String>>) -> Result<BTreeSet<TargetOs>, ManifestError> {
    let tokens = raw.unwrap_or_default();
    if tokens.is_empty() {
        return Err(ManifestError::malformed("target_os cannot be empty"));
    }
    tokens
        .iter()
        .map(|t| t.parse::<TargetOs>().map_err(ManifestError::Malformed))
        .collect()
}

fn resolve_entry_point(package: &ModPackage, entry_point: &str) -> Result<String, ManifestError> {
    let normalized = match normalize_relative(entry_point) {
        Ok(path) => path,
        Err(PathRejection::Empty) => {
            return Err(ManifestError::MissingEntryPoint(entry_point.to_string()))
        }
        Err(PathRejection::Absolute | PathRejection::Escapes) => {
            return Err(ManifestError::InvalidEntryPoint(entry_point.to_string()))
        }
    };

    if !package.contains(&normalized) {
        return Err(ManifestError::MissingEntryPoint(entry_point.to_string()));
    }
    Ok(normalized)
}

fn parse_permissions(tokens: &[String]) -> Result<PermissionSet, ManifestError> {
    tokens
        .iter()
        .map(|t| {
            t.parse::<Permission>()
                .map_err(|_| ManifestError::UnknownPermission(t.clone()))
        })
        .collect()
}
