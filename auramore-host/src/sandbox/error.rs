//! Sandbox error types

use thiserror::Error;

/// Errors raised while attaching or running a sandbox
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Engine creation failed: {0}")]
    EngineCreation(#[source] anyhow::Error),

    #[error("Module compilation failed: {0}")]
    ModuleCompilation(#[source] anyhow::Error),

    #[error("Host function linking failed: {0}")]
    Linking(#[source] anyhow::Error),

    #[error("Instantiation failed: {0}")]
    Instantiation(#[source] anyhow::Error),

    #[error("Export not found: {0}")]
    ExportNotFound(&'static str),

    #[error("Export has wrong signature: {name}: {source}")]
    ExportSignature {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Guest init returned {0}")]
    InitFailed(i32),

    #[error("Guest trapped in {function}: {message}")]
    Trap {
        function: &'static str,
        message: String,
    },

    #[error("Fuel exhausted in {0} (CPU limit exceeded)")]
    FuelExhausted(&'static str),

    #[error("Sandbox worker failed: {0}")]
    Worker(String),
}

impl SandboxError {
    /// Classify an error returned by a guest call
    pub(crate) fn from_call(function: &'static str, error: anyhow::Error) -> Self {
        match error.downcast_ref::<wasmtime::Trap>() {
            Some(wasmtime::Trap::OutOfFuel) => Self::FuelExhausted(function),
            _ => Self::Trap {
                function,
                message: format!("{:#}", error),
            },
        }
    }
}
