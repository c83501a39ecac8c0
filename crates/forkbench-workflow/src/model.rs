use std::path::PathBuf;

use forkbench_core::{OpKind, SchemaMap};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Options fixed for the lifetime of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Workflow name, used as the prefix of every output document.
    pub name: String,
    /// Directory where snapshots and documents are written.
    pub out_dir: PathBuf,
    /// Seed of the workflow RNG. A random seed is drawn when absent.
    pub seed: Option<u64>,
    pub backend: BackendKind,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            name: "wf".to_string(),
            out_dir: PathBuf::from("out"),
            seed: None,
            backend: BackendKind::default(),
        }
    }
}

/// Parameters of one `generate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Number of artifacts the workflow should hold when generation ends.
    pub target_count: usize,
    /// Selector branching factor; see `ArtifactSelector`.
    pub branching_factor: f64,
    /// Operation kinds never proposed.
    pub excluded_ops: Vec<OpKind>,
    /// Row count of synthesized join partners. Random when absent.
    pub join_rows: Option<usize>,
    /// Accept a merge as the operation that reaches `target_count`.
    pub allow_final_merge: bool,
    /// Consecutive draws that produced nothing before generation gives up.
    pub max_idle_draws: usize,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            target_count: 10,
            branching_factor: 5.0,
            excluded_ops: Vec::new(),
            join_rows: None,
            allow_final_merge: false,
            max_idle_draws: 1000,
        }
    }
}

/// Lifecycle of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Empty,
    BaseGenerated,
    Generating,
    Complete,
    /// No live artifact admits a legal operation; ended early.
    Exhausted,
    Failed,
}

/// One materialized table known to the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub label: String,
    pub schema_map: SchemaMap,
    pub row_count: usize,
}

/// Summary returned by `generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub state: WorkflowState,
    pub artifacts: usize,
    pub operations: usize,
    /// Merges drawn as the final operation and rejected.
    pub rejected_final_merges: usize,
}
