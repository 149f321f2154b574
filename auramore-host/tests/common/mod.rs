//! Shared fixtures for host integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use auramore_host::audit::MemoryAuditSink;
use auramore_host::policy::detect_platform;
use auramore_host::sandbox::FaultSender;
use auramore_host::{
    AttachRequest, HandleId, LifecycleManager, PackageBuilder, PackageStore, PolicyConfig,
    PolicyHandle, RestorePolicy, SandboxError, SandboxFault, SandboxHandle, SandboxRuntime,
};
use auramore_host::{ModSummary, Permission, StatusKind};
use ed25519_dalek::SigningKey;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ENTRY: &str = "bin/mod.wat";

/// Guest that initializes and then idles
pub const IDLE_GUEST: &str = r#"(module (func (export "mod_init") (result i32) i32.const 0))"#;

pub fn manifest(id: &str, permissions: &[&str]) -> Value {
    json!({
        "schema_version": 1,
        "id": id,
        "name": format!("Mod {}", id),
        "version": "1.0.0",
        "author": "Aura",
        "description": "Test mod",
        "target_os": ["all"],
        "target_apps": ["all"],
        "permissions": permissions,
        "entry_point": ENTRY,
    })
}

pub fn package(manifest: &Value) -> Vec<u8> {
    package_with_entry(manifest, IDLE_GUEST)
}

pub fn package_with_entry(manifest: &Value, guest: &str) -> Vec<u8> {
    PackageBuilder::new()
        .manifest(manifest)
        .entry(ENTRY, guest)
        .build()
        .unwrap()
}

pub fn signed_package(manifest: &Value, key_id: &str, key: &SigningKey) -> Vec<u8> {
    PackageBuilder::new()
        .manifest(manifest)
        .entry(ENTRY, IDLE_GUEST)
        .sign(key_id, key)
        .build()
        .unwrap()
}

pub fn publisher_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

/// Non-strict policy for the host platform allowing `allowed`
pub fn policy(allowed: &[Permission]) -> PolicyConfig {
    PolicyConfig {
        strict_mode: false,
        allowed_permissions: allowed.iter().copied().collect(),
        trusted_keys: BTreeMap::new(),
        host_platform: detect_platform(),
    }
}

pub struct Harness {
    pub manager: LifecycleManager,
    pub runtime: Arc<ScriptedRuntime>,
    pub audit: Arc<MemoryAuditSink>,
    pub policy: PolicyHandle,
}

pub async fn open(dir: &Path, config: PolicyConfig) -> Harness {
    open_with(dir, config, Arc::new(ScriptedRuntime::new()), RestorePolicy::default()).await
}

pub async fn open_with(
    dir: &Path,
    config: PolicyConfig,
    runtime: Arc<ScriptedRuntime>,
    restore: RestorePolicy,
) -> Harness {
    let audit = Arc::new(MemoryAuditSink::new());
    let policy = PolicyHandle::load(config);
    let manager = LifecycleManager::builder(PackageStore::open(dir).unwrap(), runtime.clone())
        .policy(policy.clone())
        .audit(audit.clone())
        .restore(restore)
        .open()
        .await
        .unwrap();

    Harness {
        manager,
        runtime,
        audit,
        policy,
    }
}

/// Poll until a mod reaches `kind`
pub async fn wait_for_status(manager: &LifecycleManager, id: &str, kind: StatusKind) -> ModSummary {
    for _ in 0..200 {
        let summary = manager.summary(id).unwrap();
        if summary.status == kind {
            return summary;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {:?}", id, kind);
}

struct Live {
    mod_id: String,
    faults: FaultSender,
    request: AttachRequest,
}

/// In-process runtime whose behavior tests script
#[derive(Default)]
pub struct ScriptedRuntime {
    next_id: AtomicU64,
    live: Mutex<HashMap<HandleId, Live>>,
    failures: Mutex<HashMap<String, i32>>,
    detach_delay: Mutex<Option<Duration>>,
    pub attach_calls: AtomicUsize,
    pub detach_calls: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next attach of `mod_id` fail with a non-zero init code
    pub fn fail_next_attach(&self, mod_id: &str, code: i32) {
        self.failures.lock().unwrap().insert(mod_id.to_string(), code);
    }

    /// Slow down every detach
    pub fn set_detach_delay(&self, delay: Duration) {
        *self.detach_delay.lock().unwrap() = Some(delay);
    }

    /// Report a crash for the live sandbox of `mod_id`
    pub fn crash(&self, mod_id: &str, reason: &str) -> bool {
        let live = self.live.lock().unwrap();
        let Some((handle, live)) = live.iter().find(|(_, l)| l.mod_id == mod_id) else {
            return false;
        };
        live.faults
            .send(SandboxFault {
                mod_id: mod_id.to_string(),
                handle: *handle,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Last request of the live sandbox of `mod_id`
    pub fn live_request(&self, mod_id: &str) -> Option<AttachRequest> {
        self.live
            .lock()
            .unwrap()
            .values()
            .find(|l| l.mod_id == mod_id)
            .map(|l| l.request.clone())
    }

    pub fn attaches(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    async fn attach(&self, request: AttachRequest) -> Result<SandboxHandle, SandboxError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.failures.lock().unwrap().remove(&request.mod_id) {
            return Err(SandboxError::InitFailed(code));
        }

        let mut live = self.live.lock().unwrap();
        assert!(
            live.values().all(|l| l.mod_id != request.mod_id),
            "second sandbox attached for {}",
            request.mod_id
        );

        let id = HandleId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mod_id = request.mod_id.clone();
        live.insert(
            id,
            Live {
                mod_id: mod_id.clone(),
                faults: request.faults.clone(),
                request,
            },
        );
        Ok(SandboxHandle { id, mod_id })
    }

    async fn detach(&self, handle: &SandboxHandle) -> bool {
        let delay = *self.detach_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let removed = self.live.lock().unwrap().remove(&handle.id).is_some();
        if removed {
            self.detach_calls.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    fn attached_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}
