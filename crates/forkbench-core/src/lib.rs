//! Core contracts and helpers for forkbench.
//!
//! This crate defines the column taxonomy, schema maps and their
//! classification, the operation vocabulary, the persisted workflow documents
//! and the lineage graph shared by the generator, the workflow engine and the
//! CLI.

pub mod error;
pub mod graph;
pub mod log;
pub mod ops;
pub mod schema;
pub mod taxonomy;
pub mod value;

pub use error::{Error, Result};
pub use graph::{EdgeSignature, LineageEdge, LineageGraph, LineageNode};
pub use log::{OpStatus, OperationLog, OperationRecord, SchemaMapExport};
pub use ops::{
    AggFunction, ApplyArgs, Comparator, FillArgs, GroupbyArgs, MergeArgs, OpKind, OpStep,
    PivotArgs, ProjectArgs, SampleArgs, SelectArgs, plan_chain,
};
pub use schema::{Classification, SchemaCatalog, SchemaMap};
pub use taxonomy::{ColumnTaxonomy, GROUPABLE, JOINABLE, NUMERIC, STRING};
pub use value::Value;

/// Prefix used for every artifact label (`artifact_<n>`).
pub const ARTIFACT_PREFIX: &str = "artifact_";

/// Build the label of the `index`-th artifact of a workflow.
pub fn artifact_label(index: usize) -> String {
    format!("{ARTIFACT_PREFIX}{index}")
}
