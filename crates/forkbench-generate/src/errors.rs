use thiserror::Error;

/// Errors emitted while drawing schemas and synthesizing tables.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no synthesizer for column kind '{0}'")]
    UnknownKind(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("frame shape error: {0}")]
    Shape(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Core(#[from] forkbench_core::Error),
}
