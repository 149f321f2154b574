//! Validated mod manifest

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::PermissionSet;

/// Operating systems a mod can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Windows,
    Macos,
    Linux,
    /// Wildcard: any platform
    All,
}

impl TargetOs {
    /// Platform the host process is running on
    ///
    /// Returns `None` on platforms outside the closed set.
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Self::Macos)
        } else if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Macos => "macos",
            Self::Linux => "linux",
            Self::All => "all",
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetOs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "windows" => Ok(Self::Windows),
            "macos" => Ok(Self::Macos),
            "linux" => Ok(Self::Linux),
            "all" => Ok(Self::All),
            other => Err(format!("unsupported target os: {}", other)),
        }
    }
}

/// Host applications a mod attaches to
///
/// Serialized as a list of names; the single entry `"all"` is the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum TargetApps {
    All,
    Only(BTreeSet<String>),
}

impl TargetApps {
    /// Whether a host application name is covered
    pub fn covers(&self, app: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(apps) => apps.contains(app),
        }
    }
}

impl TryFrom<Vec<String>> for TargetApps {
    type Error = String;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("target_apps cannot be empty".to_string());
        }
        if value.iter().any(|a| a.trim().is_empty()) {
            return Err("target_apps cannot contain empty names".to_string());
        }
        if value.iter().any(|a| a == "all") {
            if value.len() > 1 {
                return Err("\"all\" cannot be combined with named apps".to_string());
            }
            return Ok(Self::All);
        }
        Ok(Self::Only(value.into_iter().collect()))
    }
}

impl From<TargetApps> for Vec<String> {
    fn from(value: TargetApps) -> Self {
        match value {
            TargetApps::All => vec!["all".to_string()],
            TargetApps::Only(apps) => apps.into_iter().collect(),
        }
    }
}

/// Declared identity and capability requests of a mod package
///
/// Instances are only produced by the host's manifest validator, so every
/// field here already satisfies the schema rules. `id` is stable across
/// versions; reinstalling the same id is an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModManifest {
    /// Schema version the manifest was written against
    pub schema_version: u32,

    /// Unique, stable mod identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Semantic version of this package
    pub version: semver::Version,

    /// Mod author
    pub author: String,

    /// Short description for the catalog
    pub description: String,

    /// Supported operating systems (non-empty)
    pub target_os: BTreeSet<TargetOs>,

    /// Supported host applications
    pub target_apps: TargetApps,

    /// Requested capabilities
    #[serde(default)]
    pub permissions: PermissionSet,

    /// Normalized path of the loadable unit inside the package
    pub entry_point: String,
}

impl ModManifest {
    /// Whether the manifest declares support for a host platform
    pub fn supports_os(&self, host: TargetOs) -> bool {
        self.target_os.contains(&TargetOs::All) || self.target_os.contains(&host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_apps_wildcard() {
        let apps = TargetApps::try_from(vec!["all".to_string()]).unwrap();
        assert_eq!(apps, TargetApps::All);
        assert!(apps.covers("explorer"));
    }

    #[test]
    fn test_target_apps_rejects_mixed_wildcard() {
        let result = TargetApps::try_from(vec!["all".to_string(), "dock".to_string()]);
        assert!(result.is_err());
        assert!(TargetApps::try_from(Vec::new()).is_err());
    }

    #[test]
    fn test_target_apps_serialization() {
        let apps = TargetApps::try_from(vec!["taskbar".to_string(), "dock".to_string()]).unwrap();
        let json = serde_json::to_string(&apps).unwrap();
        assert_eq!(json, r#"["dock","taskbar"]"#);
        assert!(!apps.covers("finder"));
    }

    #[test]
    fn test_target_os_parse() {
        assert_eq!("macos".parse::<TargetOs>(), Ok(TargetOs::Macos));
        assert!("beos".parse::<TargetOs>().is_err());
    }
}
