use thiserror::Error;

/// Core error type shared across forkbench crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The taxonomy definition is malformed.
    #[error("invalid taxonomy: {0}")]
    InvalidTaxonomy(String),
    /// An operation cannot be applied to the given schema(s).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// The lineage graph would violate its invariants.
    #[error("lineage error: {0}")]
    Lineage(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results returned by forkbench crates.
pub type Result<T> = std::result::Result<T, Error>;
