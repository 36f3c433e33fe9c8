//! Typed failures surfaced by the execution core.

use crate::worker::protocol::LogEntry;
use serde::Serialize;
use thiserror::Error;

/// Every way a service operation can fail.
///
/// Variants carry a human-readable message; `Compilation` additionally keeps
/// the script logs captured up to the fault so callers can diagnose it.
#[derive(Debug, Error, Clone)]
pub enum CascadeError {
    /// Bad input, rejected before any worker work.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The script faulted during evaluation.
    #[error("Compilation error: {message}")]
    Compilation {
        message: String,
        logs: Vec<LogEntry>,
    },

    /// The script evaluated but the kernel could not mesh the result.
    #[error("Tessellation error: {0}")]
    Tessellation(String),

    /// The script evaluated but native export failed.
    #[error("Export error: {0}")]
    Export(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The worker did not answer within its budget and has been terminated.
    #[error("Worker timed out after {timeout_ms} ms during {stage}")]
    Timeout { stage: &'static str, timeout_ms: u64 },

    #[error("Worker pool exhausted ({max} workers live)")]
    PoolExhausted { max: usize },

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    /// The worker went away mid-operation (swept, panicked, or closed).
    #[error("Worker lost: {0}")]
    WorkerLost(String),
}

impl CascadeError {
    /// Stable machine-readable kind, used on the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CascadeError::Validation(_) => ErrorKind::ValidationError,
            CascadeError::Compilation { .. } => ErrorKind::CompilationError,
            CascadeError::Tessellation(_) => ErrorKind::TessellationError,
            CascadeError::Export(_) => ErrorKind::ExportError,
            CascadeError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            CascadeError::Timeout { .. } => ErrorKind::Timeout,
            CascadeError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            CascadeError::InvalidMesh(_) => ErrorKind::InvalidMesh,
            CascadeError::WorkerLost(_) => ErrorKind::WorkerLost,
        }
    }

    /// Logs captured before the failure, if any.
    pub fn logs(&self) -> &[LogEntry] {
        match self {
            CascadeError::Compilation { logs, .. } => logs,
            _ => &[],
        }
    }

    /// Whether the same request can succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CascadeError::PoolExhausted { .. } | CascadeError::WorkerLost(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ValidationError,
    CompilationError,
    TessellationError,
    ExportError,
    UnsupportedFormat,
    Timeout,
    PoolExhausted,
    InvalidMesh,
    WorkerLost,
}

pub type CascadeResult<T> = Result<T, CascadeError>;
