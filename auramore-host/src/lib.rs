//! auramore-host: Mod lifecycle host for auramore
//!
//! This crate validates mod packages, decides whether they may run, keeps
//! the durable registry of installed mods and runs enabled mods inside
//! wasm sandboxes.
//!
//! ```text
//! package bytes ─► validator ─► policy ─► store ─► sandbox runtime
//!                        ╲         │         ▲          │
//!                         ╲        ▼         │          ▼ faults
//!                          ╰─► LifecycleManager ◄───────╯
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use auramore_host::{LifecycleManager, PackageStore, WasmSandboxRuntime, SandboxConfig};
//! use std::sync::Arc;
//!
//! let audit = Arc::new(auramore_host::audit::NullAuditSink);
//! let runtime = Arc::new(WasmSandboxRuntime::new(SandboxConfig::default(), audit.clone())?);
//! let manager = LifecycleManager::builder(PackageStore::open(data_dir)?, runtime)
//!     .audit(audit)
//!     .open()
//!     .await?;
//!
//! let outcome = manager.install(&std::fs::read("taskbar.amod")?).await?;
//! manager.enable(&outcome.summary.id).await?;
//! ```

pub mod audit;
pub mod config;
pub mod lifecycle;
pub mod package;
pub mod policy;
pub mod sandbox;
pub mod store;
pub mod validator;
pub mod watcher;

pub use config::{LifecycleSettings, Settings, SettingsError};
pub use lifecycle::{
    ErrorKind, InstallOutcome, LifecycleError, LifecycleManager, LifecycleManagerBuilder,
    RestorePolicy,
};
pub use package::{ModPackage, PackageBuilder, PackageError};
pub use policy::{PolicyConfig, PolicyHandle, PolicyPresets, TrustDecision};
pub use sandbox::{
    AttachRequest, HandleId, SandboxConfig, SandboxError, SandboxFault, SandboxHandle,
    SandboxRuntime, WasmSandboxRuntime,
};
pub use store::{InstalledModRecord, PackageStore, StoreError};
pub use validator::{ManifestError, ValidatedPackage};
pub use watcher::{SettingsWatcher, WatcherConfig, WatcherError};

pub use auramore_api::{ModDetails, ModManifest, ModStatus, ModSummary, Permission, StatusKind};
