//! Workflow generation and replay for forkbench.
//!
//! Owns the backend capability (in-memory and SQLite engines), the workflow
//! engine that grows a lineage DAG of artifacts, the replay engine and the
//! documents a workflow writes to disk.

pub mod backend;
pub mod engine;
pub mod errors;
pub mod model;
pub mod perf;
pub mod persist;
pub mod replay;

pub use backend::{
    Backend, BackendKind, Execution, MemoryBackend, SqliteBackend, open_backend,
};
pub use engine::Workflow;
pub use errors::{BackendError, BackendResult, WorkflowError, WorkflowResult};
pub use model::{Artifact, GenerateRequest, GenerationOutcome, WorkflowOptions, WorkflowState};
pub use perf::{PerfLog, PerfRecord};
pub use persist::WorkflowPaths;
pub use replay::{LoadedWorkflow, load_workflow, replay_workflow};
