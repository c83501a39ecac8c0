//! Replay of a recorded workflow.
//!
//! Replay walks the operation log in order. Sources that are not yet live
//! are either regenerated as base artifacts with a new row count (rescale)
//! or loaded from the recorded snapshots; the logged chain is then executed
//! again under its recorded label.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use forkbench_core::{ColumnTaxonomy, OperationLog, SchemaMapExport};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::engine::Workflow;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::model::{WorkflowOptions, WorkflowState};
use crate::persist::{OPERATIONS_SUFFIX, SCHEMA_MAP_SUFFIX, WorkflowPaths, read_json};

/// Documents of a previously generated workflow.
#[derive(Debug, Clone)]
pub struct LoadedWorkflow {
    pub log: OperationLog,
    pub schemas: SchemaMapExport,
    pub input_dir: PathBuf,
}

/// Read the `*_operations.json` and `*_schema_map.json` documents found in
/// `input_dir`. When several match, the first in lexical order wins.
pub fn load_workflow(input_dir: &Path) -> WorkflowResult<LoadedWorkflow> {
    let mut names: Vec<String> = fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();

    let find = |suffix: &str| -> WorkflowResult<PathBuf> {
        names
            .iter()
            .find(|name| name.ends_with(suffix))
            .map(|name| input_dir.join(name))
            .ok_or_else(|| WorkflowError::MissingDocument {
                dir: input_dir.to_path_buf(),
                pattern: format!("*{suffix}"),
            })
    };
    let log: OperationLog = read_json(&find(OPERATIONS_SUFFIX)?)?;
    let schemas: SchemaMapExport = read_json(&find(SCHEMA_MAP_SUFFIX)?)?;
    Ok(LoadedWorkflow {
        log,
        schemas,
        input_dir: input_dir.to_path_buf(),
    })
}

impl Workflow {
    /// Re-execute every successful record of `log` on this workflow.
    ///
    /// `rescale` maps base labels to a new row count; those bases are
    /// synthesized again with their recorded schema. Every other missing
    /// source is loaded from the snapshots under `snapshot_dir`. Returns the
    /// number of replayed records.
    pub fn replay(
        &mut self,
        log: &OperationLog,
        schemas: &SchemaMapExport,
        snapshot_dir: &Path,
        rescale: &IndexMap<String, usize>,
    ) -> WorkflowResult<usize> {
        if self.state() != WorkflowState::Empty {
            return Err(WorkflowError::InvalidState(format!(
                "replay needs an empty workflow, state is {:?}",
                self.state()
            )));
        }
        let snapshots = WorkflowPaths::new(snapshot_dir, &log.name);
        let extension = self.backend().file_format();
        info!(
            event = "replay_started",
            name = %log.name,
            records = log.operation_list.len(),
            rescaled = rescale.len(),
            "replay started"
        );

        self.set_state(WorkflowState::Generating);
        let mut replayed = 0usize;
        for record in &log.operation_list {
            if record.is_failed() {
                warn!(
                    event = "replay_skipped",
                    label = %record.new_label,
                    op = %record.op_names(),
                    "skipping failed record"
                );
                continue;
            }
            for source in &record.sources {
                if self.artifact(source).is_some() {
                    continue;
                }
                let schema = schemas.get(source).ok_or_else(|| WorkflowError::ReplayLookup {
                    label: source.clone(),
                    reason: "no recorded schema".to_string(),
                })?;
                if let Some(&rows) = rescale.get(source) {
                    info!(label = %source, rows, "regenerating rescaled base");
                    self.generate_base_artifact(Some(source), schema, rows)?;
                } else {
                    let path = snapshots.snapshot(source, extension);
                    if !path.is_file() {
                        return Err(WorkflowError::ReplayLookup {
                            label: source.clone(),
                            reason: format!("missing snapshot {}", path.display()),
                        });
                    }
                    self.load_base_artifact(source, &path, schema)?;
                }
            }
            let sources: Vec<&str> = record.sources.iter().map(String::as_str).collect();
            self.execute_operation(&sources, record.op_list.clone(), Some(&record.new_label))?;
            replayed += 1;
        }

        self.set_state(WorkflowState::Complete);
        info!(
            event = "replay_finished",
            name = %log.name,
            replayed,
            artifacts = self.artifact_count(),
            "replay finished"
        );
        Ok(replayed)
    }
}

/// Load the workflow in `input_dir`, replay it into a fresh workflow built
/// from `options` and write the replayed outputs.
pub fn replay_workflow(
    options: &WorkflowOptions,
    taxonomy: Arc<ColumnTaxonomy>,
    input_dir: &Path,
    rescale: &IndexMap<String, usize>,
) -> WorkflowResult<Workflow> {
    let loaded = load_workflow(input_dir)?;
    let mut workflow = Workflow::new(options, taxonomy)?;
    workflow.replay(&loaded.log, &loaded.schemas, &loaded.input_dir, rescale)?;
    workflow.serialize_workflow()?;
    Ok(workflow)
}
