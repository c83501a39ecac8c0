//! Execution backends.
//!
//! A backend owns the materialized tables of a workflow, keyed by artifact
//! label, and executes operation chains against them. The workflow engine
//! only talks to the [`Backend`] trait and never knows which engine is
//! active.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use forkbench_core::{OpKind, OpStep, SchemaMap};
use forkbench_generate::{Frame, is_numeric_kind};
use serde::{Deserialize, Serialize};

use crate::errors::{BackendError, BackendResult};

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Result of one executed operation chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub schema: SchemaMap,
    pub row_count: usize,
    /// Backend-native code that produced the artifact.
    pub code: String,
}

/// Capability interface implemented by every execution engine.
///
/// Calls are synchronous: a call returns only after the backend finished
/// the work.
pub trait Backend {
    /// Short identifier, e.g. `memory`.
    fn name(&self) -> &'static str;

    /// Extension of snapshot files.
    fn file_format(&self) -> &'static str {
        "csv"
    }

    /// Whether the backend can execute steps of `kind`.
    fn supports(&self, kind: OpKind) -> bool;

    /// Store a synthesized table under `label`.
    fn materialize_base(&mut self, label: &str, frame: Frame) -> BackendResult<()>;

    /// Execute `chain` over `sources` and store the result under `new_label`.
    fn execute(
        &mut self,
        sources: &[&str],
        chain: &[OpStep],
        new_label: &str,
    ) -> BackendResult<Execution>;

    fn row_count(&self, label: &str) -> BackendResult<usize>;

    fn schema_of(&self, label: &str) -> BackendResult<SchemaMap>;

    /// Full contents of `label`.
    fn frame(&self, label: &str) -> BackendResult<Frame>;

    /// Write `label` to a snapshot file.
    fn serialize(&self, label: &str, path: &Path) -> BackendResult<()>;

    /// Load a snapshot file as `label` with the recorded `schema`.
    fn deserialize(&mut self, label: &str, path: &Path, schema: &SchemaMap) -> BackendResult<()>;
}

/// `apply` only runs on columns whose kind holds numbers. Columns without a
/// recorded kind are left to the values themselves.
pub(crate) fn require_numeric(schema: &SchemaMap, column: &str) -> BackendResult<()> {
    match schema.kind_of(column) {
        Some(kind) if !kind.is_empty() && !is_numeric_kind(kind) => Err(
            BackendError::Execution(format!("apply on text column '{column}' of kind '{kind}'")),
        ),
        _ => Ok(()),
    }
}

/// Selectable backend implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(value: &str) -> BackendResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(BackendError::Execution(format!("unknown backend '{other}'"))),
        }
    }
}

/// Open a backend of `kind` for workflow `name` writing under `out_dir`.
pub fn open_backend(
    kind: BackendKind,
    out_dir: &Path,
    name: &str,
    seed: u64,
) -> BackendResult<Box<dyn Backend>> {
    match kind {
        BackendKind::Memory => Ok(Box::new(MemoryBackend::new(seed))),
        BackendKind::Sqlite => {
            let path = out_dir.join(format!("{name}.db"));
            Ok(Box::new(SqliteBackend::open(&path)?))
        }
    }
}
