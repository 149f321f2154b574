//! Closed capability vocabulary

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::TargetOs;

/// A named privilege a mod can request
///
/// The set is closed and versioned by [`crate::CAPABILITY_VOCABULARY_VERSION`].
/// New tokens are only ever appended so that numeric ids stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    /// Read window and control state of the host shell
    ReadUi,
    /// Change styles and layout of host UI elements
    ModifyUi,
    /// Load native code into another process
    InjectCode,
    /// Install hooks on process or window messages
    ProcessHook,
    /// Open network connections
    Network,
    /// Read files outside the package
    FileRead,
    /// Write files outside the package
    FileWrite,
    /// Access the Windows registry
    Registry,
    /// Access macOS user defaults
    UserDefaults,
}

/// Set of capability tokens, ordered for stable serialization
pub type PermissionSet = BTreeSet<Permission>;

/// A token outside the capability vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl Permission {
    /// Every token of the current vocabulary, in id order
    pub const ALL: [Permission; 9] = [
        Permission::ReadUi,
        Permission::ModifyUi,
        Permission::InjectCode,
        Permission::ProcessHook,
        Permission::Network,
        Permission::FileRead,
        Permission::FileWrite,
        Permission::Registry,
        Permission::UserDefaults,
    ];

    /// Wire token, e.g. `file-write`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUi => "read-ui",
            Self::ModifyUi => "modify-ui",
            Self::InjectCode => "inject-code",
            Self::ProcessHook => "process-hook",
            Self::Network => "network",
            Self::FileRead => "file-read",
            Self::FileWrite => "file-write",
            Self::Registry => "registry",
            Self::UserDefaults => "user-defaults",
        }
    }

    /// Numeric id used by the guest ABI
    pub fn id(&self) -> i32 {
        match self {
            Self::ReadUi => 0,
            Self::ModifyUi => 1,
            Self::InjectCode => 2,
            Self::ProcessHook => 3,
            Self::Network => 4,
            Self::FileRead => 5,
            Self::FileWrite => 6,
            Self::Registry => 7,
            Self::UserDefaults => 8,
        }
    }

    /// Look up a permission by its ABI id
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.id() == id)
    }

    /// Whether the capability can be granted on the given host platform
    ///
    /// Registry access only exists on Windows, user defaults only on macOS.
    pub fn supported_on(&self, host: TargetOs) -> bool {
        match self {
            Self::Registry => host == TargetOs::Windows,
            Self::UserDefaults => host == TargetOs::Macos,
            _ => true,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}
