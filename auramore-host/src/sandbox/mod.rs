//! Sandbox runtime
//!
//! A sandbox is an isolated execution context for exactly one enabled mod.
//! The lifecycle manager only ever holds a [`SandboxHandle`], a plain token
//! it can hand back to [`SandboxRuntime::detach`]. When a running sandbox
//! dies the runtime sends a [`SandboxFault`] on the channel given at attach
//! time instead of returning an error into anyone's call stack.

mod error;
mod wasm;

pub use error::SandboxError;
pub use wasm::{SandboxConfig, WasmSandboxRuntime};

use async_trait::async_trait;
use auramore_api::PermissionSet;
use std::fmt;
use tokio::sync::mpsc;

/// Identifier of one attachment
///
/// Never reused within a process, so a fault for an old attachment can
/// always be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox-{}", self.0)
    }
}

/// Non-owning reference to a live sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: HandleId,
    pub mod_id: String,
}

/// Unexpected termination of a running sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxFault {
    pub mod_id: String,
    pub handle: HandleId,
    pub reason: String,
}

pub type FaultSender = mpsc::UnboundedSender<SandboxFault>;
pub type FaultReceiver = mpsc::UnboundedReceiver<SandboxFault>;

/// Create the channel faults are reported on
pub fn fault_channel() -> (FaultSender, FaultReceiver) {
    mpsc::unbounded_channel()
}

/// Everything needed to start one sandbox
#[derive(Clone)]
pub struct AttachRequest {
    pub mod_id: String,
    /// Normalized entry point path inside the package
    pub entry_point: String,
    /// Bytes of the entry point module
    pub module: Vec<u8>,
    /// Capabilities the guest may exercise
    pub granted: PermissionSet,
    /// Where to report a later crash
    pub faults: FaultSender,
}

impl fmt::Debug for AttachRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachRequest")
            .field("mod_id", &self.mod_id)
            .field("entry_point", &self.entry_point)
            .field("module_len", &self.module.len())
            .field("granted", &self.granted)
            .finish()
    }
}

/// Isolation boundary for mod execution
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Start a sandbox and return once the guest finished initializing
    ///
    /// On error nothing is left running.
    async fn attach(&self, request: AttachRequest) -> Result<SandboxHandle, SandboxError>;

    /// Tear a sandbox down
    ///
    /// Returns `false` when the handle is unknown (already detached).
    async fn detach(&self, handle: &SandboxHandle) -> bool;

    /// Number of sandboxes currently attached
    fn attached_count(&self) -> usize;
}
