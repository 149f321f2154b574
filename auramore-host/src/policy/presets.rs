//! Ready-made policy configurations

use super::{detect_platform, PolicyConfig};
use auramore_api::Permission;
use std::collections::BTreeMap;

/// Preset policies for common setups
pub struct PolicyPresets;

impl PolicyPresets {
    /// Desktop default
    ///
    /// - Signatures optional
    /// - UI reading and styling, shell hooks, file reads and the platform
    ///   settings store are grantable
    /// - Network, file writes and code injection must be allowed explicitly
    pub fn default_desktop() -> PolicyConfig {
        PolicyConfig {
            strict_mode: false,
            allowed_permissions: [
                Permission::ReadUi,
                Permission::ModifyUi,
                Permission::ProcessHook,
                Permission::FileRead,
                Permission::Registry,
                Permission::UserDefaults,
            ]
            .into_iter()
            .collect(),
            trusted_keys: BTreeMap::new(),
            host_platform: detect_platform(),
        }
    }

    /// Desktop default with signatures required from the given publishers
    pub fn strict(trusted_keys: BTreeMap<String, String>) -> PolicyConfig {
        PolicyConfig {
            strict_mode: true,
            trusted_keys,
            ..Self::default_desktop()
        }
    }

    /// Everything grantable, no signature required (testing only)
    pub fn permissive() -> PolicyConfig {
        PolicyConfig {
            strict_mode: false,
            allowed_permissions: Permission::ALL.into_iter().collect(),
            trusted_keys: BTreeMap::new(),
            host_platform: detect_platform(),
        }
    }
}
