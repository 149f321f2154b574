//! Lifecycle status and presentation projections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ContentHash, ModManifest};

/// Operational state of an installed mod
///
/// `enabled` is derived from the variant, so a mod can never be enabled
/// and in error at the same time. A disabled mod keeps the reason of its
/// last failure until a successful enable or a reinstall clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModStatus {
    Inactive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
    },
    Active,
    Error {
        reason: String,
    },
}

/// Flat status as shown by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Inactive,
    Active,
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Error => "error",
        })
    }
}

/// Event driving a status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Sandbox attached after a successful enable
    Enabled,
    /// Explicit disable
    Disabled,
    /// Enable attempt refused or failed
    Failed(String),
    /// Running sandbox terminated unexpectedly
    Crashed(String),
}

impl StatusEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Failed(_) => "failed",
            Self::Crashed(_) => "crashed",
        }
    }
}

/// Transition not allowed by the lifecycle state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition: {event} while {from}")]
pub struct IllegalTransition {
    pub from: StatusKind,
    pub event: &'static str,
}

impl Default for ModStatus {
    fn default() -> Self {
        Self::Inactive { last_error: None }
    }
}

impl ModStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Inactive { .. } => StatusKind::Inactive,
            Self::Active => StatusKind::Active,
            Self::Error { .. } => StatusKind::Error,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Error message to surface: the current failure or the retained one
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Inactive { last_error } => last_error.as_deref(),
            Self::Active => None,
            Self::Error { reason } => Some(reason),
        }
    }

    /// Apply an event and return the next status
    ///
    /// ```text
    ///            Enabled               Crashed / Failed
    ///  Inactive ─────────► Active ─────────────────────► Error
    ///     ▲                  │                             │
    ///     └──── Disabled ────┘◄──────── Enabled ───────────┘
    ///     ▲                                                │
    ///     └────────────────── Disabled ────────────────────┘
    /// ```
    pub fn apply(&self, event: StatusEvent) -> Result<ModStatus, IllegalTransition> {
        let illegal = || IllegalTransition {
            from: self.kind(),
            event: event.name(),
        };

        match (self, &event) {
            (Self::Active, StatusEvent::Enabled) => Err(illegal()),
            (_, StatusEvent::Enabled) => Ok(Self::Active),

            (Self::Active, StatusEvent::Disabled) => Ok(Self::Inactive { last_error: None }),
            (Self::Inactive { last_error }, StatusEvent::Disabled) => Ok(Self::Inactive {
                last_error: last_error.clone(),
            }),
            (Self::Error { reason }, StatusEvent::Disabled) => Ok(Self::Inactive {
                last_error: Some(reason.clone()),
            }),

            (_, StatusEvent::Failed(reason)) => Ok(Self::Error {
                reason: reason.clone(),
            }),

            (Self::Active, StatusEvent::Crashed(reason)) => Ok(Self::Error {
                reason: reason.clone(),
            }),
            (_, StatusEvent::Crashed(_)) => Err(illegal()),
        }
    }
}

/// Row of the installed-mods list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModSummary {
    pub id: String,
    pub name: String,
    pub author: String,
    pub version: String,
    pub description: String,
    pub enabled: bool,
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModSummary {
    pub fn new(manifest: &ModManifest, status: &ModStatus) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            author: manifest.author.clone(),
            version: manifest.version.to_string(),
            description: manifest.description.clone(),
            enabled: status.is_enabled(),
            status: status.kind(),
            error: status.error().map(str::to_string),
        }
    }
}

/// Full view of one installed mod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModDetails {
    pub manifest: ModManifest,
    pub enabled: bool,
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub content_hash: ContentHash,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_disable_cycle() {
        let status = ModStatus::default();
        let active = status.apply(StatusEvent::Enabled).unwrap();
        assert!(active.is_enabled());

        let inactive = active.apply(StatusEvent::Disabled).unwrap();
        assert_eq!(inactive, ModStatus::Inactive { last_error: None });
    }

    #[test]
    fn test_duplicate_enable_is_illegal() {
        let err = ModStatus::Active.apply(StatusEvent::Enabled).unwrap_err();
        assert_eq!(err.from, StatusKind::Active);
        assert_eq!(err.event, "enabled");
    }

    #[test]
    fn test_disable_retains_error() {
        let failed = ModStatus::default()
            .apply(StatusEvent::Failed("SignatureInvalid".into()))
            .unwrap();
        assert_eq!(failed.kind(), StatusKind::Error);

        let disabled = failed.apply(StatusEvent::Disabled).unwrap();
        assert_eq!(disabled.kind(), StatusKind::Inactive);
        assert_eq!(disabled.error(), Some("SignatureInvalid"));

        // Only a successful enable clears it
        let active = disabled.apply(StatusEvent::Enabled).unwrap();
        assert_eq!(active.error(), None);
    }

    #[test]
    fn test_crash_only_from_active() {
        let crashed = ModStatus::Active
            .apply(StatusEvent::Crashed("trap".into()))
            .unwrap();
        assert_eq!(crashed.error(), Some("trap"));

        assert!(ModStatus::default()
            .apply(StatusEvent::Crashed("late".into()))
            .is_err());
        assert!(crashed.apply(StatusEvent::Crashed("again".into())).is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ModStatus::Error {
            reason: "PermissionDenied(file-write)".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"state":"error","reason":"PermissionDenied(file-write)"}"#
        );

        let back: ModStatus = serde_json::from_str(r#"{"state":"inactive"}"#).unwrap();
        assert_eq!(back, ModStatus::default());
    }
}
