//! Random choices behind forkbench workflows.
//!
//! Draws column schemas, synthesizes table contents and join partners,
//! enumerates the operations that are legal on a table and picks the artifact
//! the next operation branches from. All randomness flows through a caller
//! supplied `RngCore` so a seeded generator reproduces a run.

pub mod choices;
pub mod errors;
pub mod frame;
pub mod output;
pub mod selector;
pub mod synth;

pub use choices::OperationChoiceGenerator;
pub use errors::GenerationError;
pub use frame::Frame;
pub use output::csv::{read_frame_csv, write_frame_csv};
pub use selector::ArtifactSelector;
pub use synth::{
    draw_schema, is_numeric_kind, synthesize_column, synthesize_frame, synthesize_join_partner,
};
