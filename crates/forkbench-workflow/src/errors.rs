use std::path::PathBuf;

use forkbench_core::OpKind;
use forkbench_generate::GenerationError;
use thiserror::Error;

/// Failures raised by a storage/execution backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend cannot express this operation kind.
    #[error("the {backend} backend does not support '{op}'")]
    Unsupported { backend: &'static str, op: OpKind },
    #[error("unknown artifact '{0}'")]
    MissingArtifact(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Core(#[from] forkbench_core::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sql(#[from] sqlx::Error),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors surfaced by workflow generation and replay.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The active backend cannot execute the operation. Not retried.
    #[error("'{op}' on {sources:?} is not supported by the {backend} backend (args: {args})")]
    Unsupported {
        backend: String,
        op: OpKind,
        sources: Vec<String>,
        args: serde_json::Value,
    },
    /// Execution failed inside the backend; generated state was flushed
    /// before this error was returned.
    #[error("'{op}' on {sources:?} failed (args: {args}): {source}")]
    Backend {
        op: String,
        sources: Vec<String>,
        args: serde_json::Value,
        source: BackendError,
    },
    /// A logged source has neither a snapshot nor a rescale directive.
    #[error("cannot replay artifact '{label}': {reason}")]
    ReplayLookup { label: String, reason: String },
    /// The chain does not fit its source schemas.
    #[error("invalid operation on {sources:?}: {reason}")]
    InvalidOperation { sources: Vec<String>, reason: String },
    #[error("invalid workflow state: {0}")]
    InvalidState(String),
    #[error("no '{pattern}' document in {}", .dir.display())]
    MissingDocument { dir: PathBuf, pattern: String },
    #[error(transparent)]
    Storage(#[from] BackendError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Core(#[from] forkbench_core::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
