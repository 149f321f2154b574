//! Host settings
//!
//! Stored as TOML, by default at `<config dir>/auramore/settings.toml`:
//!
//! ```toml
//! strict_mode = false
//! allowed_permissions = ["read-ui", "modify-ui", "process-hook"]
//! zoom_level = 1.25
//!
//! [trusted_keys]
//! aura-publisher = "base64 ed25519 public key"
//!
//! [sandbox]
//! fuel_per_call = 10000000
//! max_memory_bytes = 33554432
//! tick_interval_ms = 100
//!
//! [lifecycle]
//! restore = "retry_once"
//! ```
//!
//! A missing file means defaults. The policy part is pushed into the
//! [`PolicyHandle`](crate::policy::PolicyHandle) at startup and on change.

use crate::lifecycle::RestorePolicy;
use crate::package::DEFAULT_MAX_PACKAGE_BYTES;
use crate::policy::{decode_public_key, detect_platform, PolicyConfig, PolicyPresets};
use crate::sandbox::SandboxConfig;
use auramore_api::PermissionSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const APP_DIR: &str = "auramore";
pub const SETTINGS_FILE: &str = "settings.toml";

/// Accepted interface zoom factors
pub const ZOOM_RANGE: RangeInclusive<f64> = 0.5..=2.0;

/// Error type for settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Zoom level {0} outside accepted range 0.5..=2.0")]
    ZoomOutOfRange(f64),

    #[error("Invalid trusted key '{key_id}': {reason}")]
    InvalidKey { key_id: String, reason: String },
}

/// Lifecycle manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub restore: RestorePolicy,
    pub max_package_bytes: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            restore: RestorePolicy::default(),
            max_package_bytes: DEFAULT_MAX_PACKAGE_BYTES,
        }
    }
}

/// Persisted host settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Require verified publisher signatures
    pub strict_mode: bool,

    /// Capabilities the policy may grant
    pub allowed_permissions: PermissionSet,

    /// Interface zoom factor (presentation preference only)
    pub zoom_level: f64,

    /// Data root override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Trusted publisher keys: key id to base64 Ed25519 public key
    pub trusted_keys: BTreeMap<String, String>,

    pub sandbox: SandboxConfig,

    pub lifecycle: LifecycleSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strict_mode: false,
            allowed_permissions: PolicyPresets::default_desktop().allowed_permissions,
            zoom_level: 1.0,
            data_dir: None,
            trusted_keys: BTreeMap::new(),
            sandbox: SandboxConfig::default(),
            lifecycle: LifecycleSettings::default(),
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR)
            .join(SETTINGS_FILE)
    }

    /// Load settings; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let settings: Self = toml::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        self.validate()?;
        let path = path.as_ref();
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_zoom(self.zoom_level)?;
        for (key_id, key) in &self.trusted_keys {
            decode_public_key(key).map_err(|reason| SettingsError::InvalidKey {
                key_id: key_id.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Data root: override or `<data dir>/auramore`
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join(APP_DIR)
        })
    }

    /// Policy configuration for this host
    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            strict_mode: self.strict_mode,
            allowed_permissions: self.allowed_permissions.clone(),
            trusted_keys: self.trusted_keys.clone(),
            host_platform: detect_platform(),
        }
    }

    pub fn set_zoom_level(&mut self, scale: f64) -> Result<(), SettingsError> {
        check_zoom(scale)?;
        self.zoom_level = scale;
        Ok(())
    }
}

fn check_zoom(scale: f64) -> Result<(), SettingsError> {
    if scale.is_finite() && ZOOM_RANGE.contains(&scale) {
        Ok(())
    } else {
        Err(SettingsError::ZoomOutOfRange(scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auramore_api::Permission;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("settings.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.zoom_level, 1.0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.strict_mode = true;
        settings.allowed_permissions.insert(Permission::Network);
        settings.set_zoom_level(1.25).unwrap();
        settings.lifecycle.restore = RestorePolicy::MarkError;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "allowed_permissions = [\"network\"]\n[sandbox]\ntick_interval_ms = 5\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(!settings.strict_mode);
        assert_eq!(settings.allowed_permissions.len(), 1);
        assert_eq!(settings.sandbox.tick_interval_ms, 5);
        assert_eq!(settings.sandbox.fuel_per_call, SandboxConfig::default().fuel_per_call);
    }

    #[test]
    fn test_zoom_range() {
        let mut settings = Settings::default();
        assert!(settings.set_zoom_level(0.5).is_ok());
        assert!(settings.set_zoom_level(2.0).is_ok());
        assert!(matches!(
            settings.set_zoom_level(3.0),
            Err(SettingsError::ZoomOutOfRange(_))
        ));
        assert!(settings.set_zoom_level(f64::NAN).is_err());
        assert_eq!(settings.zoom_level, 2.0);
    }

    #[test]
    fn test_rejects_unknown_permission_and_bad_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        fs::write(&path, "allowed_permissions = [\"kernel\"]\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Parse(_))));

        fs::write(&path, "[trusted_keys]\npub = \"nope\"\n").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_policy_config() {
        let mut settings = Settings::default();
        settings.strict_mode = true;
        let config = settings.policy_config();
        assert!(config.strict_mode);
        assert_eq!(config.allowed_permissions, settings.allowed_permissions);
    }
}
