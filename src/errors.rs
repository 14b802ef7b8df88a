//! Typed error hierarchy for the streaming bridge.
//!
//! Four enums cover the four subsystems:
//! - `WorkerError` — spawning and reading the worker process
//! - `FrameError` — line reassembly bounds
//! - `ConsumeError` — client-side stream consumption failures
//! - `PlanError` — plan document validation failures

use thiserror::Error;

/// Errors from the worker process adapter.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker process '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker stdout pipe was not available")]
    StdoutUnavailable,
}

/// Errors from chunk-to-line reassembly.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Worker output line exceeded {limit} bytes without a terminator")]
    LineTooLong { limit: usize },
}

/// Errors from the client stream consumer.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("Malformed result payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("Stream truncated before a terminal event")]
    TruncatedStream,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected request with status {status}: {message}")]
    Http { status: u16, message: String },
}

/// Validation failures for a decoded plan document.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Plan has no modules")]
    NoModules,

    #[error("Module {index} has non-positive step number {step_number}")]
    BadStepNumber { index: usize, step_number: i64 },

    #[error("Module {index} breaks the strictly increasing step order")]
    OutOfOrder { index: usize },
}
