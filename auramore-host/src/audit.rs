//! Audit trail for mod lifecycle and capability events
//!
//! Sinks are pluggable; the host records every install, state transition
//! and refused capability request. Recording failures are logged by the
//! caller and never abort a lifecycle operation.

use auramore_api::{ContentHash, ModManifest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// One audited event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub mod_id: String,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, mod_id: impl Into<String>, details: AuditDetails) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            mod_id: mod_id.into(),
            details,
        }
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Installed,
    Updated,
    InstallRefused,
    Uninstalled,
    Enabled,
    EnableFailed,
    Disabled,
    Crashed,
    CapabilityDenied,
    IntegrityMismatch,
    Restored,
}

/// Event payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    /// Package identity
    Package {
        version: String,
        content_hash: String,
    },
    /// Outcome of a policy or sandbox step
    Outcome {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature_verified: Option<bool>,
    },
    /// Refused guest capability request
    Capability { capability: String },
    /// Stored artifact no longer matches the record
    Integrity {
        expected: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actual: Option<String>,
    },
    None,
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Shared sink handle
pub type SharedAuditSink = Arc<dyn AuditSink>;

/// Record an event, logging instead of failing
///
/// Every event is also traced under the `auramore::audit` target.
pub fn record_or_warn(sink: &dyn AuditSink, event: AuditEvent) {
    tracing::debug!(
        target: "auramore::audit",
        mod_id = %event.mod_id,
        event_type = ?event.event_type,
        "Audit event"
    );
    if let Err(e) = sink.record(&event) {
        tracing::warn!(mod_id = %event.mod_id, event_type = ?event.event_type, error = %e, "Failed to record audit event");
    }
}

/// Append-only JSON Lines log, one event per line
///
/// Each event goes out in a single `write_all` on a file opened in append
/// mode, so lines from the host and the sandbox workers never interleave.
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .write_all(&line)?;
        Ok(())
    }
}

/// Keeps every event in memory for assertions
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one type, optionally for one mod
    pub fn find(&self, event_type: AuditEventType, mod_id: Option<&str>) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter(|e| mod_id.map_or(true, |id| e.mod_id == id))
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Default sink when the host is built without one
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

// ============================================================================
// Event constructors
// ============================================================================

fn package_details(manifest: &ModManifest, hash: &ContentHash) -> AuditDetails {
    AuditDetails::Package {
        version: manifest.version.to_string(),
        content_hash: hash.to_string(),
    }
}

fn outcome(reason: &str, signature_verified: Option<bool>) -> AuditDetails {
    AuditDetails::Outcome {
        reason: reason.to_string(),
        signature_verified,
    }
}

pub fn installed(manifest: &ModManifest, hash: &ContentHash, update: bool) -> AuditEvent {
    let event_type = if update {
        AuditEventType::Updated
    } else {
        AuditEventType::Installed
    };
    AuditEvent::new(event_type, &manifest.id, package_details(manifest, hash))
}

pub fn install_refused(mod_id: &str, reason: &str, signature_verified: Option<bool>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::InstallRefused,
        mod_id,
        outcome(reason, signature_verified),
    )
}

pub fn uninstalled(mod_id: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::Uninstalled, mod_id, AuditDetails::None)
}

pub fn enabled(mod_id: &str, signature_verified: bool) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::Enabled,
        mod_id,
        outcome("Allowed", Some(signature_verified)),
    )
}

pub fn enable_failed(mod_id: &str, reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::EnableFailed, mod_id, outcome(reason, None))
}

pub fn disabled(mod_id: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::Disabled, mod_id, AuditDetails::None)
}

pub fn crashed(mod_id: &str, reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::Crashed, mod_id, outcome(reason, None))
}

pub fn capability_denied(mod_id: &str, capability: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CapabilityDenied,
        mod_id,
        AuditDetails::Capability {
            capability: capability.to_string(),
        },
    )
}

pub fn integrity_mismatch(mod_id: &str, expected: &ContentHash, actual: Option<&ContentHash>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::IntegrityMismatch,
        mod_id,
        AuditDetails::Integrity {
            expected: expected.to_string(),
            actual: actual.map(ToString::to_string),
        },
    )
}

pub fn restored(mod_id: &str, result: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::Restored, mod_id, outcome(result, None))
}
