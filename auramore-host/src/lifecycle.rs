//! Lifecycle manager
//!
//! Orchestrates install, uninstall, enable and disable over the package
//! store, the trust policy and the sandbox runtime. It is the only writer
//! of the store.
//!
//! # Concurrency
//!
//! Mutating operations serialize per mod id through an async lock table;
//! different ids proceed in parallel. Queries read the store snapshot and
//! never wait on those locks. Sandbox faults are consumed by a background
//! task that takes the same per-id lock, so a crash and a racing disable
//! are applied one after the other and the sandbox is detached once.
//!
//! # Return conventions
//!
//! | Outcome | Result |
//! |---------|--------|
//! | validation failure | `Err(Validation)`, nothing stored |
//! | trust failure at install | `Err(Policy)`, nothing stored |
//! | policy refusal at enable | status `error` recorded, then `Err(Policy)` |
//! | integrity mismatch at enable | status `error` recorded, then `Err(Integrity)` |
//! | sandbox attach failure | `Ok(summary)` with status `error` |
//! | unknown id | `Err(NotFound)`, except uninstall which succeeds |

use crate::audit::{self, record_or_warn, NullAuditSink, SharedAuditSink};
use crate::package::{ModPackage, DEFAULT_MAX_PACKAGE_BYTES};
use crate::policy::{self, PolicyHandle, TrustDecision};
use crate::sandbox::{
    fault_channel, AttachRequest, FaultReceiver, FaultSender, SandboxFault, SandboxHandle,
    SandboxRuntime,
};
use crate::store::{InstalledModRecord, PackageStore, StoreError};
use crate::validator::{validate_package, ManifestError};
use auramore_api::{ContentHash, ModDetails, ModStatus, ModSummary, StatusEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Reason recorded for a mod whose artifact no longer matches its record
pub const INTEGRITY_MISMATCH: &str = "IntegrityMismatch";

/// Reason recorded by [`RestorePolicy::MarkError`]
pub const INTERRUPTED: &str = "interrupted: sandbox not attached";

/// Errors returned by lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ManifestError),

    #[error("{0}")]
    Policy(String),

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),

    #[error("Mod not found: {0}")]
    NotFound(String),

    #[error("IntegrityMismatch: {mod_id} expected {expected}")]
    Integrity {
        mod_id: String,
        expected: ContentHash,
        actual: Option<ContentHash>,
    },
}

/// Coarse error classification for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Policy,
    Storage,
    NotFound,
    Integrity,
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Policy(_) => ErrorKind::Policy,
            Self::Storage(_) => ErrorKind::Storage,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Integrity { .. } => ErrorKind::Integrity,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

/// What to do at startup with mods persisted as active
///
/// After a restart no sandbox is attached, so a record saying `active`
/// is stale and must be reconciled one way or the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Run one full enable; a failure leaves the mod in `error`
    #[default]
    RetryOnce,
    /// Put the mod in `error` with [`INTERRUPTED`]
    MarkError,
}

/// Result of a successful install
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub summary: ModSummary,
    /// Policy decision at install time; may deny permissions that only
    /// block a later enable
    pub decision: TrustDecision,
    /// Whether an existing mod was replaced
    pub updated: bool,
}

struct Inner {
    store: PackageStore,
    policy: PolicyHandle,
    runtime: Arc<dyn SandboxRuntime>,
    audit: SharedAuditSink,
    restore: RestorePolicy,
    max_package_bytes: u64,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    handles: Mutex<HashMap<String, SandboxHandle>>,
    faults: FaultSender,
    fault_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let task = self.fault_task.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = task.take() {
            task.abort();
        }
    }
}

/// Builder for [`LifecycleManager`]
pub struct LifecycleManagerBuilder {
    store: PackageStore,
    runtime: Arc<dyn SandboxRuntime>,
    policy: Option<PolicyHandle>,
    audit: Option<SharedAuditSink>,
    restore: RestorePolicy,
    max_package_bytes: u64,
}

impl LifecycleManagerBuilder {
    pub fn policy(mut self, policy: PolicyHandle) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn restore(mut self, restore: RestorePolicy) -> Self {
        self.restore = restore;
        self
    }

    pub fn max_package_bytes(mut self, limit: u64) -> Self {
        self.max_package_bytes = limit;
        self
    }

    /// Start the manager and reconcile persisted state
    ///
    /// Must run inside a tokio runtime.
    pub async fn open(self) -> Result<LifecycleManager, LifecycleError> {
        let (faults, fault_rx) = fault_channel();
        let inner = Arc::new(Inner {
            store: self.store,
            policy: self.policy.unwrap_or_default(),
            runtime: self.runtime,
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            restore: self.restore,
            max_package_bytes: self.max_package_bytes,
            locks: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            faults,
            fault_task: Mutex::new(None),
        });

        let task = tokio::spawn(consume_faults(Arc::downgrade(&inner), fault_rx));
        *inner.fault_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        let manager = LifecycleManager { inner };
        manager.reconcile().await;
        Ok(manager)
    }
}

/// Orchestrator of mod installs and state transitions
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("store", &self.inner.store)
            .field("restore", &self.inner.restore)
            .field("attached", &self.attached_ids())
            .finish()
    }
}

impl LifecycleManager {
    pub fn builder(store: PackageStore, runtime: Arc<dyn SandboxRuntime>) -> LifecycleManagerBuilder {
        LifecycleManagerBuilder {
            store,
            runtime,
            policy: None,
            audit: None,
            restore: RestorePolicy::default(),
            max_package_bytes: DEFAULT_MAX_PACKAGE_BYTES,
        }
    }

    pub fn policy(&self) -> &PolicyHandle {
        &self.inner.policy
    }

    pub fn store(&self) -> &PackageStore {
        &self.inner.store
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Installed mods, oldest install first
    pub fn list(&self) -> Vec<ModSummary> {
        self.inner.store.list().iter().map(InstalledModRecord::summary).collect()
    }

    /// Summary of one mod
    pub fn summary(&self, id: &str) -> Result<ModSummary, LifecycleError> {
        Ok(self.inner.store.get(id)?.summary())
    }

    /// Manifest and current status of one mod
    pub fn details(&self, id: &str) -> Result<ModDetails, LifecycleError> {
        Ok(self.inner.store.get(id)?.details())
    }

    /// Ids of mods with a live sandbox
    pub fn attached_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.handles().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Install / uninstall
    // ------------------------------------------------------------------

    /// Install or update a mod from package bytes
    ///
    /// An update of an enabled mod leaves it disabled; the caller has to
    /// enable it again. The new record is committed before the old sandbox
    /// is torn down, so a failed store write leaves the running mod as it
    /// was.
    pub async fn install(&self, bytes: &[u8]) -> Result<InstallOutcome, LifecycleError> {
        let validated = validate_package(bytes, self.inner.max_package_bytes).map_err(|e| {
            tracing::warn!(error = %e, code = e.code(), "Package rejected");
            e
        })?;
        let manifest = validated.manifest;
        let package = validated.package;
        let id = manifest.id.clone();

        let _guard = self.lock(&id).await;

        let config = self.inner.policy.snapshot();
        let decision = policy::evaluate(&manifest, &package, &config);
        if decision.denial.as_ref().is_some_and(|d| d.is_trust_failure()) {
            tracing::warn!(mod_id = %id, reason = %decision.reason, "Install refused by policy");
            self.audit(audit::install_refused(
                &id,
                &decision.reason,
                Some(decision.signature_verified),
            ));
            return Err(LifecycleError::Policy(decision.reason));
        }
        if !decision.allowed {
            tracing::warn!(mod_id = %id, reason = %decision.reason, "Installed mod requests permissions the policy denies");
        }

        let store = &self.inner.store;
        let hash = package.content_hash().clone();
        store.write_artifact(&hash, bytes)?;

        let previous = match store.get(&id) {
            Ok(record) => Some(record),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let written = match &previous {
            Some(_) => store.replace(manifest.clone(), hash.clone()),
            None => store.put(manifest.clone(), hash.clone()),
        };

        let record = match written {
            Ok(record) => record,
            Err(e) => {
                self.discard_artifact(&hash);
                return Err(e.into());
            }
        };

        if let Some(prev) = &previous {
            if self.detach_mod(&id).await || prev.enabled() {
                tracing::info!(mod_id = %id, "Disabled for update");
            }
            if prev.content_hash != hash {
                self.discard_artifact(&prev.content_hash);
            }
        }

        let updated = previous.is_some();
        self.audit(audit::installed(&manifest, &hash, updated));
        tracing::info!(
            mod_id = %id,
            version = %manifest.version,
            content_hash = %hash,
            updated,
            "Mod installed"
        );

        Ok(InstallOutcome {
            summary: record.summary(),
            decision,
            updated,
        })
    }

    /// Uninstall a mod; unknown ids succeed silently
    pub async fn uninstall(&self, id: &str) -> Result<(), LifecycleError> {
        let guard = self.lock(id).await;
        let result = self.uninstall_locked(id).await;
        drop(guard);
        self.forget_lock(id);
        result
    }

    async fn uninstall_locked(&self, id: &str) -> Result<(), LifecycleError> {
        let record = match self.inner.store.get(id) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(mod_id = %id, "Uninstall of unknown mod ignored");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.detach_mod(id).await;
        self.inner.store.remove(id)?;
        self.discard_artifact(&record.content_hash);

        self.audit(audit::uninstalled(id));
        tracing::info!(mod_id = %id, "Mod uninstalled");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enable / disable
    // ------------------------------------------------------------------

    /// Enable a mod
    ///
    /// Enabling an active mod re-evaluates the policy: if it still allows
    /// the mod nothing happens, otherwise the sandbox is torn down and the
    /// mod moves to `error`.
    pub async fn enable(&self, id: &str) -> Result<ModSummary, LifecycleError> {
        let _guard = self.lock(id).await;
        let record = self.inner.store.get(id)?;

        let package = match self.load_verified(&record) {
            Ok(package) => package,
            Err(err @ LifecycleError::Integrity { .. }) => {
                if let LifecycleError::Integrity { expected, actual, .. } = &err {
                    self.audit(audit::integrity_mismatch(id, expected, actual.as_ref()));
                }
                self.fail(&record, INTEGRITY_MISMATCH).await?;
                return Err(err);
            }
            Err(e) => return Err(e),
        };

        let config = self.inner.policy.snapshot();
        let decision = policy::evaluate(&record.manifest, &package, &config);
        if !decision.allowed {
            self.fail(&record, &decision.reason).await?;
            return Err(LifecycleError::Policy(decision.reason));
        }

        let attached = self.handles().contains_key(id);
        if record.enabled() && attached {
            tracing::debug!(mod_id = %id, "Already enabled");
            return Ok(record.summary());
        }

        let Some(module) = package.entry(&record.manifest.entry_point) else {
            let reason = format!("MissingEntryPoint: {}", record.manifest.entry_point);
            return Ok(self.fail(&record, &reason).await?.summary());
        };

        let request = AttachRequest {
            mod_id: id.to_string(),
            entry_point: record.manifest.entry_point.clone(),
            module: module.to_vec(),
            granted: policy::granted_permissions(&record.manifest, &config),
            faults: self.inner.faults.clone(),
        };

        let handle = match self.inner.runtime.attach(request).await {
            Ok(handle) => handle,
            Err(e) => {
                let reason = e.to_string();
                return Ok(self.fail(&record, &reason).await?.summary());
            }
        };

        let next = record
            .status
            .apply(StatusEvent::Enabled)
            .unwrap_or(ModStatus::Active);
        let updated = match self.inner.store.update_status(id, next) {
            Ok(updated) => updated,
            Err(e) => {
                // Never leave a sandbox running that the store does not know about
                self.inner.runtime.detach(&handle).await;
                return Err(e.into());
            }
        };
        self.handles().insert(id.to_string(), handle);

        self.audit(audit::enabled(id, decision.signature_verified));
        tracing::info!(mod_id = %id, signature_verified = decision.signature_verified, "Mod enabled");
        Ok(updated.summary())
    }

    /// Disable a mod
    ///
    /// An `error` status becomes `inactive` but keeps its message.
    pub async fn disable(&self, id: &str) -> Result<ModSummary, LifecycleError> {
        let _guard = self.lock(id).await;
        let record = self.inner.store.get(id)?;

        self.detach_mod(id).await;

        let next = record
            .status
            .apply(StatusEvent::Disabled)
            .unwrap_or_else(|_| ModStatus::default());
        let record = if next != record.status {
            self.inner.store.update_status(id, next)?
        } else {
            record
        };

        self.audit(audit::disabled(id));
        tracing::info!(mod_id = %id, "Mod disabled");
        Ok(record.summary())
    }

    /// Enable or disable depending on `enabled`
    pub async fn toggle(&self, id: &str, enabled: bool) -> Result<ModSummary, LifecycleError> {
        if enabled {
            self.enable(id).await
        } else {
            self.disable(id).await
        }
    }

    /// Detach every sandbox, leaving records as persisted
    ///
    /// Mods that were active stay recorded as active, so the next start
    /// restores them according to the [`RestorePolicy`].
    pub async fn shutdown(&self) {
        for id in self.attached_ids() {
            let _guard = self.lock(&id).await;
            self.detach_mod(&id).await;
        }
        tracing::info!("Lifecycle manager shut down");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<String, SandboxHandle>> {
        self.inner.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.inner.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id.to_string()).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Drop the lock entry of an id nobody holds or waits on
    fn forget_lock(&self, id: &str) {
        let mut locks = self.inner.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).is_some_and(|m| Arc::strong_count(m) == 1) {
            locks.remove(id);
        }
    }

    fn audit(&self, event: audit::AuditEvent) {
        record_or_warn(&*self.inner.audit, event);
    }

    /// Tear down the sandbox of a mod, if any
    async fn detach_mod(&self, id: &str) -> bool {
        let handle = self.handles().remove(id);
        match handle {
            Some(handle) => self.inner.runtime.detach(&handle).await,
            None => false,
        }
    }

    /// Detach if needed and record a failed enable
    async fn fail(
        &self,
        record: &InstalledModRecord,
        reason: &str,
    ) -> Result<InstalledModRecord, LifecycleError> {
        let id = record.id();
        self.detach_mod(id).await;

        let next = record
            .status
            .apply(StatusEvent::Failed(reason.to_string()))
            .unwrap_or_else(|_| ModStatus::Error {
                reason: reason.to_string(),
            });
        let updated = self.inner.store.update_status(id, next)?;

        self.audit(audit::enable_failed(id, reason));
        tracing::warn!(mod_id = %id, reason = %reason, "Enable failed");
        Ok(updated)
    }

    /// Read the stored artifact and check it against the record
    fn load_verified(&self, record: &InstalledModRecord) -> Result<ModPackage, LifecycleError> {
        let mismatch = |actual: Option<ContentHash>| LifecycleError::Integrity {
            mod_id: record.id().to_string(),
            expected: record.content_hash.clone(),
            actual,
        };

        let bytes = match self.inner.store.read_artifact(&record.content_hash) {
            Ok(bytes) => bytes,
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(mod_id = %record.id(), "Package artifact missing");
                return Err(mismatch(None));
            }
            Err(e) => return Err(e.into()),
        };

        let package = ModPackage::from_bytes(&bytes, self.inner.max_package_bytes).map_err(|e| {
            tracing::warn!(mod_id = %record.id(), error = %e, "Package artifact unreadable");
            mismatch(None)
        })?;

        if package.content_hash() != &record.content_hash {
            tracing::warn!(
                mod_id = %record.id(),
                expected = %record.content_hash,
                actual = %package.content_hash(),
                "Package artifact changed since install"
            );
            return Err(mismatch(Some(package.content_hash().clone())));
        }
        Ok(package)
    }

    /// Remove an artifact no record references any more
    fn discard_artifact(&self, hash: &ContentHash) {
        if self.inner.store.artifact_in_use(hash) {
            return;
        }
        if let Err(e) = self.inner.store.remove_artifact(hash) {
            tracing::warn!(content_hash = %hash, error = %e, "Failed to remove package artifact");
        }
    }

    /// Apply a sandbox fault under the mod's lock
    async fn handle_fault(&self, fault: SandboxFault) {
        let _guard = self.lock(&fault.mod_id).await;

        let current = self.handles().get(&fault.mod_id).map(|h| h.id);
        let handle = if current == Some(fault.handle) {
            self.handles().remove(&fault.mod_id)
        } else {
            None
        };
        let Some(handle) = handle else {
            tracing::debug!(mod_id = %fault.mod_id, handle = %fault.handle, "Stale fault ignored");
            return;
        };

        self.inner.runtime.detach(&handle).await;

        let record = match self.inner.store.get(&fault.mod_id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(mod_id = %fault.mod_id, error = %e, "Fault for missing record");
                return;
            }
        };
        match record.status.apply(StatusEvent::Crashed(fault.reason.clone())) {
            Ok(next) => {
                if let Err(e) = self.inner.store.update_status(&fault.mod_id, next) {
                    tracing::error!(mod_id = %fault.mod_id, error = %e, "Failed to record crash");
                }
            }
            Err(e) => {
                tracing::debug!(mod_id = %fault.mod_id, error = %e, "Crash not applicable");
            }
        }

        self.audit(audit::crashed(&fault.mod_id, &fault.reason));
        tracing::warn!(mod_id = %fault.mod_id, reason = %fault.reason, "Mod crashed");
    }

    /// Bring persisted state in line with "nothing attached"
    async fn reconcile(&self) {
        let stale: Vec<_> = self
            .inner
            .store
            .list()
            .into_iter()
            .filter(InstalledModRecord::enabled)
            .collect();

        for record in stale {
            let id = record.id();
            let result = match self.inner.restore {
                RestorePolicy::RetryOnce => match self.enable(id).await {
                    Ok(summary) if summary.enabled => "active".to_string(),
                    Ok(summary) => summary.error.unwrap_or_else(|| "inactive".to_string()),
                    Err(e) => e.to_string(),
                },
                RestorePolicy::MarkError => {
                    let status = ModStatus::Error {
                        reason: INTERRUPTED.to_string(),
                    };
                    match self.inner.store.update_status(id, status) {
                        Ok(_) => INTERRUPTED.to_string(),
                        Err(e) => {
                            tracing::error!(mod_id = %id, error = %e, "Failed to reconcile record");
                            continue;
                        }
                    }
                }
            };
            self.audit(audit::restored(id, &result));
            tracing::info!(mod_id = %id, result = %result, "Reconciled mod persisted as active");
        }

        match self.inner.store.prune_artifacts() {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "Pruned orphan package artifacts"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune package artifacts"),
        }
    }
}

async fn consume_faults(inner: Weak<Inner>, mut faults: FaultReceiver) {
    while let Some(fault) = faults.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        LifecycleManager { inner }.handle_fault(fault).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LifecycleError::from(StoreError::NotFound("x".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LifecycleError::Policy("SignatureInvalid".into()).to_string(),
            "SignatureInvalid"
        );
        let validation = LifecycleError::from(ManifestError::InvalidEntryPoint("../x".into()));
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert!(validation.to_string().starts_with("InvalidEntryPoint"));
    }

    struct IdleRuntime;

    #[async_trait::async_trait]
    impl SandboxRuntime for IdleRuntime {
        async fn attach(
            &self,
            _request: AttachRequest,
        ) -> Result<SandboxHandle, crate::sandbox::SandboxError> {
            Err(crate::sandbox::SandboxError::Worker("not started in tests".into()))
        }

        async fn detach(&self, _handle: &SandboxHandle) -> bool {
            false
        }

        fn attached_count(&self) -> usize {
            0
        }
    }

    fn tracked_locks(manager: &LifecycleManager) -> usize {
        manager.inner.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_uninstall_forgets_lock_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        let manager = LifecycleManager::builder(store, Arc::new(IdleRuntime))
            .open()
            .await
            .unwrap();

        let manifest = serde_json::json!({
            "schema_version": 1,
            "id": "clock",
            "name": "Clock",
            "version": "1.0.0",
            "author": "Aura",
            "description": "Clock widget",
            "target_os": ["all"],
            "target_apps": ["all"],
            "permissions": [],
            "entry_point": "mod.wat"
        });
        let bytes = crate::PackageBuilder::new()
            .manifest(&manifest)
            .entry("mod.wat", "(module)")
            .build()
            .unwrap();

        manager.install(&bytes).await.unwrap();
        assert_eq!(tracked_locks(&manager), 1);

        manager.uninstall("clock").await.unwrap();
        manager.uninstall("ghost").await.unwrap();
        assert_eq!(tracked_locks(&manager), 0);
    }

    #[test]
    fn test_restore_policy_serde() {
        let policy: RestorePolicy = serde_json::from_str(r#""mark_error""#).unwrap();
        assert_eq!(policy, RestorePolicy::MarkError);
        assert_eq!(RestorePolicy::default(), RestorePolicy::RetryOnce);
    }
}
