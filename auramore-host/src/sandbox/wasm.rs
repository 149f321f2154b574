//! WebAssembly sandbox runtime using wasmtime
//!
//! Each attached mod gets its own OS thread owning a `Store`. The thread
//! instantiates the entry module, runs `mod_init`, then drives `mod_tick`
//! until it is told to stop, at which point it runs `mod_shutdown`.
//!
//! Isolation comes from three places:
//! - the guest can only reach the host through the `auramore` imports,
//!   and `request` refuses any capability outside the granted set
//! - every call gets a fuel budget and the store has a memory ceiling
//! - traps and panics stay on the worker thread and surface as a
//!   [`SandboxFault`]

use super::{
    AttachRequest, HandleId, SandboxError, SandboxFault, SandboxHandle, SandboxRuntime,
};
use crate::audit::{self, SharedAuditSink};
use async_trait::async_trait;
use auramore_api::abi::{
    EXPORT_INIT, EXPORT_MEMORY, EXPORT_SHUTDOWN, EXPORT_TICK, HOST_MODULE, IMPORT_LOG,
    IMPORT_REQUEST, REQUEST_DENIED, REQUEST_GRANTED, REQUEST_UNKNOWN,
};
use auramore_api::{Permission, PermissionSet};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use wasmtime::{
    Caller, Config, Engine, Extern, Instance, Linker, Module, Store, StoreLimits,
    StoreLimitsBuilder, TypedFunc,
};

/// Longest guest log message kept, in bytes
const MAX_LOG_BYTES: usize = 1024;

/// Resource limits applied to every sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Fuel budget for each guest call
    pub fuel_per_call: u64,
    /// Linear memory ceiling per sandbox
    pub max_memory_bytes: usize,
    /// Interval between `mod_tick` calls
    pub tick_interval_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            fuel_per_call: 10_000_000,
            max_memory_bytes: 32 * 1024 * 1024,
            tick_interval_ms: 100,
        }
    }
}

impl SandboxConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Per-store state visible to host functions
struct GuestState {
    mod_id: String,
    granted: PermissionSet,
    limits: StoreLimits,
    audit: SharedAuditSink,
    denied: Arc<AtomicU64>,
}

struct Worker {
    mod_id: String,
    stop: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
    denied: Arc<AtomicU64>,
}

struct WorkerJob {
    engine: Engine,
    config: SandboxConfig,
    audit: SharedAuditSink,
    handle: HandleId,
    request: AttachRequest,
    denied: Arc<AtomicU64>,
}

/// Sandbox runtime executing mods as wasm modules
pub struct WasmSandboxRuntime {
    engine: Engine,
    config: SandboxConfig,
    audit: SharedAuditSink,
    next_id: AtomicU64,
    workers: Mutex<HashMap<HandleId, Worker>>,
}

impl WasmSandboxRuntime {
    pub fn new(config: SandboxConfig, audit: SharedAuditSink) -> Result<Self, SandboxError> {
        let mut engine_config = Config::new();
        engine_config.consume_fuel(true);
        engine_config.wasm_memory64(false);

        let engine = Engine::new(&engine_config).map_err(SandboxError::EngineCreation)?;

        Ok(Self {
            engine,
            config,
            audit,
            next_id: AtomicU64::new(0),
            workers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Capability requests refused so far for a live sandbox
    pub fn denied_requests(&self, handle: &SandboxHandle) -> Option<u64> {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle.id)
            .map(|w| w.denied.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for WasmSandboxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmSandboxRuntime")
            .field("config", &self.config)
            .field("attached", &self.attached_count())
            .finish()
    }
}

#[async_trait]
impl SandboxRuntime for WasmSandboxRuntime {
    async fn attach(&self, request: AttachRequest) -> Result<SandboxHandle, SandboxError> {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mod_id = request.mod_id.clone();
        let denied = Arc::new(AtomicU64::new(0));

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let job = WorkerJob {
            engine: self.engine.clone(),
            config: self.config.clone(),
            audit: self.audit.clone(),
            handle: id,
            request,
            denied: denied.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("mod-{}", mod_id))
            .spawn(move || run_worker(job, ready_tx, stop_rx))
            .map_err(|e| SandboxError::Worker(e.to_string()))?;

        let ready = ready_rx
            .await
            .unwrap_or_else(|_| Err(SandboxError::Worker("worker exited before init".into())));

        if let Err(e) = ready {
            join_worker(thread).await;
            tracing::warn!(mod_id = %mod_id, error = %e, "Sandbox attach failed");
            return Err(e);
        }

        self.workers.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            Worker {
                mod_id: mod_id.clone(),
                stop: stop_tx,
                thread,
                denied,
            },
        );
        tracing::info!(mod_id = %mod_id, handle = %id, "Sandbox attached");

        Ok(SandboxHandle { id, mod_id })
    }

    async fn detach(&self, handle: &SandboxHandle) -> bool {
        let worker = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.id);

        let Some(worker) = worker else {
            tracing::debug!(mod_id = %handle.mod_id, handle = %handle.id, "Detach of unknown sandbox ignored");
            return false;
        };

        // The worker may already have exited after a fault
        let _ = worker.stop.send(());
        join_worker(worker.thread).await;
        tracing::info!(mod_id = %worker.mod_id, handle = %handle.id, "Sandbox detached");
        true
    }

    fn attached_count(&self) -> usize {
        self.workers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for WasmSandboxRuntime {
    fn drop(&mut self) {
        let workers = self.workers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, worker) in workers.drain() {
            let _ = worker.stop.send(());
        }
    }
}

async fn join_worker(thread: JoinHandle<()>) {
    if let Err(e) = tokio::task::spawn_blocking(move || thread.join()).await {
        tracing::warn!(error = %e, "Failed to join sandbox worker");
    }
}

// ============================================================================
// Worker thread
// ============================================================================

type ReadySender = oneshot::Sender<Result<(), SandboxError>>;

fn run_worker(job: WorkerJob, ready: ReadySender, stop: std_mpsc::Receiver<()>) {
    let mut ready = Some(ready);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| drive(&job, &mut ready, &stop)))
        .unwrap_or_else(|payload| {
            Err(SandboxError::Worker(format!(
                "sandbox panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

    let Err(error) = outcome else {
        return;
    };

    match ready.take() {
        Some(tx) => {
            let _ = tx.send(Err(error));
        }
        None => {
            tracing::warn!(mod_id = %job.request.mod_id, handle = %job.handle, error = %error, "Sandbox faulted");
            let _ = job.request.faults.send(SandboxFault {
                mod_id: job.request.mod_id.clone(),
                handle: job.handle,
                reason: error.to_string(),
            });
        }
    }
}

/// Instantiate, initialize and run the guest until stopped
fn drive(
    job: &WorkerJob,
    ready: &mut Option<ReadySender>,
    stop: &std_mpsc::Receiver<()>,
) -> Result<(), SandboxError> {
    let fuel = job.config.fuel_per_call;

    let module = Module::new(&job.engine, &job.request.module).map_err(SandboxError::ModuleCompilation)?;

    let state = GuestState {
        mod_id: job.request.mod_id.clone(),
        granted: job.request.granted.clone(),
        limits: StoreLimitsBuilder::new()
            .memory_size(job.config.max_memory_bytes)
            .instances(1)
            .build(),
        audit: job.audit.clone(),
        denied: job.denied.clone(),
    };
    let mut store = Store::new(&job.engine, state);
    store.limiter(|s| &mut s.limits);
    store.set_fuel(fuel).map_err(SandboxError::EngineCreation)?;

    let linker = host_linker(&job.engine)?;
    let instance = linker
        .instantiate(&mut store, &module)
        .map_err(SandboxError::Instantiation)?;

    let init = instance
        .get_func(&mut store, EXPORT_INIT)
        .ok_or(SandboxError::ExportNotFound(EXPORT_INIT))?
        .typed::<(), i32>(&store)
        .map_err(|source| SandboxError::ExportSignature {
            name: EXPORT_INIT,
            source,
        })?;
    let tick = optional_export(&instance, &mut store, EXPORT_TICK)?;
    let shutdown = optional_export(&instance, &mut store, EXPORT_SHUTDOWN)?;

    store.set_fuel(fuel).map_err(SandboxError::EngineCreation)?;
    let code = init
        .call(&mut store, ())
        .map_err(|e| SandboxError::from_call(EXPORT_INIT, e))?;
    if code != 0 {
        return Err(SandboxError::InitFailed(code));
    }

    if let Some(tx) = ready.take() {
        let _ = tx.send(Ok(()));
    }

    match &tick {
        Some(tick) => loop {
            match stop.recv_timeout(job.config.tick_interval()) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    store.set_fuel(fuel).map_err(SandboxError::EngineCreation)?;
                    tick.call(&mut store, ())
                        .map_err(|e| SandboxError::from_call(EXPORT_TICK, e))?;
                }
            }
        },
        None => {
            let _ = stop.recv();
        }
    }

    if let Some(shutdown) = shutdown {
        store.set_fuel(fuel).map_err(SandboxError::EngineCreation)?;
        if let Err(e) = shutdown.call(&mut store, ()) {
            tracing::debug!(mod_id = %job.request.mod_id, error = %e, "Guest shutdown failed");
        }
    }
    Ok(())
}

fn optional_export(
    instance: &Instance,
    store: &mut Store<GuestState>,
    name: &'static str,
) -> Result<Option<TypedFunc<(), ()>>, SandboxError> {
    match instance.get_func(&mut *store, name) {
        None => Ok(None),
        Some(func) => func
            .typed::<(), ()>(&*store)
            .map(Some)
            .map_err(|source| SandboxError::ExportSignature { name, source }),
    }
}

fn host_linker(engine: &Engine) -> Result<Linker<GuestState>, SandboxError> {
    let mut linker = Linker::new(engine);

    linker
        .func_wrap(
            HOST_MODULE,
            IMPORT_REQUEST,
            |caller: Caller<'_, GuestState>, capability: i32| -> i32 {
                request_capability(caller.data(), capability)
            },
        )
        .map_err(SandboxError::Linking)?;

    linker
        .func_wrap(
            HOST_MODULE,
            IMPORT_LOG,
            |mut caller: Caller<'_, GuestState>, level: i32, ptr: i32, len: i32| {
                let message = read_guest_str(&mut caller, ptr, len);
                let mod_id = caller.data().mod_id.as_str();
                match level {
                    0 => tracing::error!(mod_id = %mod_id, "{}", message),
                    1 => tracing::warn!(mod_id = %mod_id, "{}", message),
                    2 => tracing::info!(mod_id = %mod_id, "{}", message),
                    3 => tracing::debug!(mod_id = %mod_id, "{}", message),
                    _ => tracing::trace!(mod_id = %mod_id, "{}", message),
                }
            },
        )
        .map_err(SandboxError::Linking)?;

    Ok(linker)
}

/// Boundary check for a guest capability request
fn request_capability(state: &GuestState, capability: i32) -> i32 {
    let (label, code) = match Permission::from_id(capability) {
        Some(p) if state.granted.contains(&p) => return REQUEST_GRANTED,
        Some(p) => (p.as_str().to_string(), REQUEST_DENIED),
        None => (format!("unknown({})", capability), REQUEST_UNKNOWN),
    };

    state.denied.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(mod_id = %state.mod_id, capability = %label, "Capability request denied");
    audit::record_or_warn(&*state.audit, audit::capability_denied(&state.mod_id, &label));
    code
}

fn read_guest_str(caller: &mut Caller<'_, GuestState>, ptr: i32, len: i32) -> String {
    let Some(Extern::Memory(memory)) = caller.get_export(EXPORT_MEMORY) else {
        return "<no memory export>".to_string();
    };
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        return "<invalid pointer>".to_string();
    };
    let len = len.min(MAX_LOG_BYTES);

    memory
        .data(&*caller)
        .get(start..start.saturating_add(len))
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_else(|| "<out of bounds>".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.fuel_per_call, 10_000_000);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_config_partial_toml() {
        let config: SandboxConfig = toml::from_str("fuel_per_call = 5").unwrap();
        assert_eq!(config.fuel_per_call, 5);
        assert_eq!(config.max_memory_bytes, SandboxConfig::default().max_memory_bytes);
    }

    #[test]
    fn test_request_boundary() {
        let sink = Arc::new(MemoryAuditSink::new());
        let state = GuestState {
            mod_id: "demo".into(),
            granted: [Permission::Network].into_iter().collect(),
            limits: StoreLimitsBuilder::new().build(),
            audit: sink.clone(),
            denied: Arc::new(AtomicU64::new(0)),
        };

        assert_eq!(request_capability(&state, Permission::Network.id()), REQUEST_GRANTED);
        assert_eq!(request_capability(&state, Permission::FileWrite.id()), REQUEST_DENIED);
        assert_eq!(request_capability(&state, 99), REQUEST_UNKNOWN);
        assert_eq!(state.denied.load(Ordering::Relaxed), 2);

        let denied = sink.find(audit::AuditEventType::CapabilityDenied, Some("demo"));
        assert_eq!(denied.len(), 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
