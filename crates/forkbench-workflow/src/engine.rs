//! Workflow engine.
//!
//! A [`Workflow`] owns the artifact registry, the lineage graph, the
//! operation log and the backend that holds the materialized tables. It grows
//! the workflow one operation at a time, either driven by
//! [`Workflow::generate`] or by explicit [`Workflow::execute_operation`] calls
//! (replay uses the latter).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use forkbench_core::{
    ARTIFACT_PREFIX, ColumnTaxonomy, LineageEdge, LineageGraph, LineageNode, OpKind, OpStep,
    OperationLog, OperationRecord, SchemaMap, SchemaMapExport, artifact_label, plan_chain,
};
use forkbench_generate::{
    ArtifactSelector, Frame, OperationChoiceGenerator, draw_schema, synthesize_frame,
    synthesize_join_partner,
};
use indexmap::IndexMap;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, open_backend};
use crate::errors::{BackendError, WorkflowError, WorkflowResult};
use crate::model::{Artifact, GenerateRequest, GenerationOutcome, WorkflowOptions, WorkflowState};
use crate::perf::{PerfLog, PerfTimer};
use crate::persist::{WorkflowPaths, write_json};

pub struct Workflow {
    name: String,
    paths: WorkflowPaths,
    backend: Box<dyn Backend>,
    taxonomy: Arc<ColumnTaxonomy>,
    artifacts: IndexMap<String, Artifact>,
    graph: LineageGraph,
    log: OperationLog,
    perf: PerfLog,
    state: WorkflowState,
    seed: u64,
    rng: ChaCha8Rng,
    next_index: usize,
}

impl Workflow {
    /// Create an empty workflow writing under `options.out_dir` with the
    /// backend selected in `options`.
    pub fn new(options: &WorkflowOptions, taxonomy: Arc<ColumnTaxonomy>) -> WorkflowResult<Self> {
        let seed = options.seed.unwrap_or_else(|| rand::rng().random());
        fs::create_dir_all(&options.out_dir)?;
        let backend = open_backend(options.backend, &options.out_dir, &options.name, seed)?;
        Self::with_backend(options, taxonomy, backend, seed)
    }

    /// Create an empty workflow on an already opened backend.
    pub fn with_backend(
        options: &WorkflowOptions,
        taxonomy: Arc<ColumnTaxonomy>,
        backend: Box<dyn Backend>,
        seed: u64,
    ) -> WorkflowResult<Self> {
        let paths = WorkflowPaths::new(&options.out_dir, &options.name);
        fs::create_dir_all(paths.artifacts_dir())?;
        info!(
            event = "workflow_opened",
            name = %options.name,
            backend = backend.name(),
            seed,
            out_dir = %options.out_dir.display(),
            "workflow opened"
        );
        Ok(Self {
            name: options.name.clone(),
            paths,
            backend,
            taxonomy,
            artifacts: IndexMap::new(),
            graph: LineageGraph::new(),
            log: OperationLog::new(&options.name),
            perf: PerfLog::default(),
            state: WorkflowState::Empty,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_index: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn paths(&self) -> &WorkflowPaths {
        &self.paths
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn taxonomy(&self) -> &ColumnTaxonomy {
        &self.taxonomy
    }

    /// Live artifacts in creation order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn artifact(&self, label: &str) -> Option<&Artifact> {
        self.artifacts.get(label)
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    pub fn graph(&self) -> &LineageGraph {
        &self.graph
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn perf(&self) -> &PerfLog {
        &self.perf
    }

    /// Operation kinds the active backend cannot execute.
    pub fn unsupported_kinds(&self) -> Vec<OpKind> {
        OpKind::ALL
            .iter()
            .copied()
            .filter(|kind| !self.backend.supports(*kind))
            .collect()
    }

    /// Synthesize the first base artifact with a freshly drawn schema.
    pub fn bootstrap(&mut self, num_cols: usize, num_rows: usize) -> WorkflowResult<String> {
        if self.state != WorkflowState::Empty {
            return Err(WorkflowError::InvalidState(format!(
                "bootstrap needs an empty workflow, state is {:?}",
                self.state
            )));
        }
        let schema = draw_schema(num_cols, &self.taxonomy, &mut self.rng)?;
        let label = self.generate_base_artifact(None, &schema, num_rows)?;
        self.state = WorkflowState::BaseGenerated;
        Ok(label)
    }

    /// Synthesize `rows` rows for `schema` and register them as a base
    /// artifact. The next free label is used when `label` is `None`.
    pub fn generate_base_artifact(
        &mut self,
        label: Option<&str>,
        schema: &SchemaMap,
        rows: usize,
    ) -> WorkflowResult<String> {
        let label = self.claim_label(label)?;
        let timer = PerfLog::start();
        let frame = synthesize_frame(schema, rows, &mut self.rng)?;
        self.add_base(&label, frame, timer)?;
        Ok(label)
    }

    /// Load a snapshot file as base artifact `label`.
    pub fn load_base_artifact(
        &mut self,
        label: &str,
        path: &Path,
        schema: &SchemaMap,
    ) -> WorkflowResult<()> {
        let label = self.claim_label(Some(label))?;
        let timer = PerfLog::start();
        self.backend.deserialize(&label, path, schema)?;
        let artifact = Artifact {
            schema_map: self.backend.schema_of(&label)?,
            row_count: self.backend.row_count(&label)?,
            label: label.clone(),
        };
        self.perf.finish(timer, &[], &label, "load");
        debug!(
            label = %label,
            rows = artifact.row_count,
            path = %path.display(),
            "loaded snapshot"
        );
        self.register(artifact)
    }

    /// Execute `chain` over `sources` and materialize the result as one new
    /// artifact, labelled `new_label` or the next free label.
    ///
    /// The chain is planned against the source schemas first; an infeasible
    /// chain fails before the backend is touched. A backend failure appends
    /// a failed record to the log, flushes what exists and is returned.
    pub fn execute_operation(
        &mut self,
        sources: &[&str],
        chain: Vec<OpStep>,
        new_label: Option<&str>,
    ) -> WorkflowResult<String> {
        let source_labels: Vec<String> = sources.iter().map(|label| label.to_string()).collect();
        let op_names = chain
            .iter()
            .map(|step| step.kind().as_str())
            .collect::<Vec<_>>()
            .join("+");
        let args = serde_json::Value::Array(chain.iter().map(OpStep::args_json).collect());

        let schemas = sources
            .iter()
            .map(|label| {
                self.artifacts
                    .get(*label)
                    .map(|artifact| &artifact.schema_map)
                    .ok_or_else(|| WorkflowError::InvalidOperation {
                        sources: source_labels.clone(),
                        reason: format!("unknown artifact '{label}'"),
                    })
            })
            .collect::<WorkflowResult<Vec<_>>>()?;
        plan_chain(&chain, &schemas).map_err(|err| WorkflowError::InvalidOperation {
            sources: source_labels.clone(),
            reason: err.to_string(),
        })?;

        if let Some(step) = chain.iter().find(|step| !self.backend.supports(step.kind())) {
            return Err(self.unsupported(step.kind(), source_labels, args));
        }

        let label = self.claim_label(new_label)?;
        let timer = PerfLog::start();
        match self.backend.execute(sources, &chain, &label) {
            Ok(execution) => {
                let elapsed = self.perf.finish(timer, sources, &label, &op_names);
                self.graph.add_derived(
                    LineageNode {
                        label: label.clone(),
                        schema_map: execution.schema.clone(),
                        row_count: execution.row_count,
                    },
                    &source_labels,
                    LineageEdge {
                        op_list: chain.clone(),
                        code: execution.code.clone(),
                    },
                )?;
                self.artifacts.insert(
                    label.clone(),
                    Artifact {
                        label: label.clone(),
                        schema_map: execution.schema,
                        row_count: execution.row_count,
                    },
                );
                info!(
                    event = "artifact_created",
                    label = %label,
                    sources = %source_labels.join(","),
                    op = %op_names,
                    rows = execution.row_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "artifact created"
                );
                self.log
                    .push(OperationRecord::new(source_labels, label.clone(), chain));
                Ok(label)
            }
            Err(BackendError::Unsupported { op, .. }) => {
                Err(self.unsupported(op, source_labels, args))
            }
            Err(source) => {
                error!(
                    event = "operation_failed",
                    label = %label,
                    sources = %source_labels.join(","),
                    op = %op_names,
                    args = %args,
                    error = %source,
                    "operation failed"
                );
                self.log.push(
                    OperationRecord::new(source_labels.clone(), label, chain).failed(),
                );
                self.state = WorkflowState::Failed;
                self.flush_after_failure();
                Err(WorkflowError::Backend {
                    op: op_names,
                    sources: source_labels,
                    args,
                    source,
                })
            }
        }
    }

    /// Grow the workflow until it holds `request.target_count` artifacts or
    /// no live artifact admits a legal operation, then write every output
    /// document.
    pub fn generate(&mut self, request: &GenerateRequest) -> WorkflowResult<GenerationOutcome> {
        match self.state {
            WorkflowState::BaseGenerated | WorkflowState::Complete | WorkflowState::Exhausted => {}
            other => {
                return Err(WorkflowError::InvalidState(format!(
                    "generate needs a bootstrapped workflow, state is {other:?}"
                )));
            }
        }
        let selector = ArtifactSelector::new(request.branching_factor)?;
        let taxonomy = Arc::clone(&self.taxonomy);
        let proposer = OperationChoiceGenerator::new(&taxonomy);

        self.state = WorkflowState::Generating;
        info!(
            event = "generation_started",
            name = %self.name,
            target = request.target_count,
            branching_factor = request.branching_factor,
            excluded = ?request.excluded_ops,
            "generation started"
        );

        let mut excluded: Vec<String> = Vec::new();
        let mut idle_draws = 0usize;
        let mut rejected_final_merges = 0usize;
        while self.artifacts.len() < request.target_count {
            if idle_draws >= request.max_idle_draws {
                warn!(
                    event = "workflow_exhausted",
                    idle_draws,
                    artifacts = self.artifacts.len(),
                    "giving up after repeated empty draws"
                );
                self.state = WorkflowState::Exhausted;
                break;
            }
            let live: Vec<String> = self.artifacts.keys().cloned().collect();
            let Some(source) = selector
                .select(&live, &excluded, &mut self.rng)
                .map(str::to_string)
            else {
                warn!(
                    event = "workflow_exhausted",
                    artifacts = self.artifacts.len(),
                    target = request.target_count,
                    "no live artifact admits an operation"
                );
                self.state = WorkflowState::Exhausted;
                break;
            };

            let (schema, row_count) = match self.artifacts.get(&source) {
                Some(artifact) => (artifact.schema_map.clone(), artifact.row_count),
                None => {
                    return Err(self.fail(WorkflowError::InvalidState(format!(
                        "selected unknown artifact '{source}'"
                    ))));
                }
            };
            if schema.is_empty() {
                debug!(source = %source, "artifact has no columns, skipping");
                idle_draws += 1;
                continue;
            }
            let mut candidates =
                proposer.propose(&schema, row_count, &request.excluded_ops, &mut self.rng);

            let remaining = request.target_count - self.artifacts.len();
            if !request.allow_final_merge
                && remaining <= 2
                && candidates.iter().any(|step| step.kind() == OpKind::Merge)
            {
                candidates.retain(|step| step.kind() != OpKind::Merge);
                rejected_final_merges += 1;
                debug!(
                    event = "final_merge_rejected",
                    source = %source,
                    remaining,
                    "merge would be the final operation"
                );
            }

            let Some(step) = candidates.choose(&mut self.rng).cloned() else {
                debug!(source = %source, "no operation applies, excluding artifact");
                excluded.push(source);
                idle_draws += 1;
                continue;
            };
            idle_draws = 0;

            let result = match &step {
                OpStep::Merge(args) => self.merge_with_partner(
                    &source,
                    &args.key_col,
                    step.clone(),
                    request,
                    &taxonomy,
                ),
                _ => self.execute_operation(&[source.as_str()], vec![step], None),
            };
            if let Err(err) = result {
                return Err(self.fail(err));
            }
        }

        if self.state == WorkflowState::Generating {
            self.state = WorkflowState::Complete;
        }
        let outcome = GenerationOutcome {
            state: self.state,
            artifacts: self.artifacts.len(),
            operations: self.log.operation_list.len(),
            rejected_final_merges,
        };
        info!(
            event = "generation_finished",
            name = %self.name,
            state = ?outcome.state,
            artifacts = outcome.artifacts,
            operations = outcome.operations,
            rejected_final_merges,
            "generation finished"
        );
        self.serialize_workflow()?;
        Ok(outcome)
    }

    /// Write every snapshot and document of the workflow.
    pub fn serialize_workflow(&self) -> WorkflowResult<()> {
        fs::create_dir_all(self.paths.artifacts_dir())?;
        let extension = self.backend.file_format();
        for label in self.artifacts.keys() {
            self.backend
                .serialize(label, &self.paths.snapshot(label, extension))?;
        }

        write_json(&self.paths.operations(), &self.log)?;

        let mut graph = BufWriter::new(File::create(self.paths.graph())?);
        self.graph.write_edgelist(&mut graph)?;
        graph.flush()?;

        let export = SchemaMapExport(
            self.artifacts
                .iter()
                .map(|(label, artifact)| (label.clone(), artifact.schema_map.clone()))
                .collect(),
        );
        write_json(&self.paths.schema_map(), &export)?;
        self.perf.write_csv(&self.paths.perf())?;

        info!(
            event = "workflow_serialized",
            name = %self.name,
            artifacts = self.artifacts.len(),
            out_dir = %self.paths.root().display(),
            "workflow written"
        );
        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: WorkflowState) {
        self.state = state;
    }

    fn merge_with_partner(
        &mut self,
        source: &str,
        key_col: &str,
        step: OpStep,
        request: &GenerateRequest,
        taxonomy: &ColumnTaxonomy,
    ) -> WorkflowResult<String> {
        let frame = self.backend.frame(source)?;
        let partner_label = self.claim_label(None)?;
        let timer = PerfLog::start();
        let partner = synthesize_join_partner(
            &frame,
            key_col,
            taxonomy,
            request.join_rows,
            &mut self.rng,
        )?;
        self.add_base(&partner_label, partner, timer)?;
        self.execute_operation(&[source, partner_label.as_str()], vec![step], None)
    }

    fn add_base(&mut self, label: &str, frame: Frame, timer: PerfTimer) -> WorkflowResult<()> {
        let artifact = Artifact {
            label: label.to_string(),
            schema_map: frame.schema().clone(),
            row_count: frame.row_count(),
        };
        self.backend.materialize_base(label, frame)?;
        self.perf.finish(timer, &[], label, "generate");
        info!(
            event = "base_artifact_created",
            label = %label,
            rows = artifact.row_count,
            columns = artifact.schema_map.len(),
            "base artifact created"
        );
        self.register(artifact)
    }

    fn register(&mut self, artifact: Artifact) -> WorkflowResult<()> {
        self.graph.add_node(LineageNode {
            label: artifact.label.clone(),
            schema_map: artifact.schema_map.clone(),
            row_count: artifact.row_count,
        })?;
        self.artifacts.insert(artifact.label.clone(), artifact);
        Ok(())
    }

    /// Pick `requested` or the next free `artifact_<n>` label and advance the
    /// counter past it.
    fn claim_label(&mut self, requested: Option<&str>) -> WorkflowResult<String> {
        let label = match requested {
            Some(label) => label.to_string(),
            None => artifact_label(self.next_index),
        };
        if self.artifacts.contains_key(&label) {
            return Err(WorkflowError::InvalidOperation {
                sources: Vec::new(),
                reason: format!("artifact '{label}' already exists"),
            });
        }
        if let Some(index) = label
            .strip_prefix(ARTIFACT_PREFIX)
            .and_then(|suffix| suffix.parse::<usize>().ok())
        {
            self.next_index = self.next_index.max(index + 1);
        }
        Ok(label)
    }

    fn unsupported(
        &mut self,
        op: OpKind,
        sources: Vec<String>,
        args: serde_json::Value,
    ) -> WorkflowError {
        self.state = WorkflowState::Failed;
        error!(
            event = "operation_unsupported",
            backend = self.backend.name(),
            op = %op,
            sources = %sources.join(","),
            "operation not supported by backend"
        );
        WorkflowError::Unsupported {
            backend: self.backend.name().to_string(),
            op,
            sources,
            args,
        }
    }

    /// Mark the workflow failed. Errors that did not flush on their own get
    /// a best-effort flush before they are returned.
    fn fail(&mut self, err: WorkflowError) -> WorkflowError {
        let flushed = matches!(
            err,
            WorkflowError::Backend { .. } | WorkflowError::Unsupported { .. }
        );
        self.state = WorkflowState::Failed;
        if !flushed {
            error!(event = "generation_failed", error = %err, "generation failed");
            self.flush_after_failure();
        }
        err
    }

    fn flush_after_failure(&self) {
        if let Err(err) = self.serialize_workflow() {
            warn!(
                event = "flush_failed",
                error = %err,
                "could not write workflow state after failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use forkbench_core::SampleArgs;

    fn workflow(label: &str) -> Workflow {
        let out_dir = std::env::temp_dir().join(format!(
            "forkbench_engine_{label}_{}",
            uuid::Uuid::new_v4()
        ));
        let options = WorkflowOptions {
            name: "wf".to_string(),
            out_dir,
            seed: Some(3),
            ..WorkflowOptions::default()
        };
        let taxonomy = Arc::new(ColumnTaxonomy::builtin().expect("taxonomy"));
        Workflow::with_backend(&options, taxonomy, Box::new(MemoryBackend::new(3)), 3)
            .expect("workflow")
    }

    #[test]
    fn bootstrap_creates_artifact_zero_once() {
        let mut workflow = workflow("bootstrap");
        assert_eq!(workflow.bootstrap(5, 20).expect("bootstrap"), "artifact_0");
        assert_eq!(workflow.state(), WorkflowState::BaseGenerated);
        assert!(matches!(
            workflow.bootstrap(5, 20),
            Err(WorkflowError::InvalidState(_))
        ));
    }

    #[test]
    fn explicit_labels_advance_the_counter() {
        let mut workflow = workflow("labels");
        let schema: SchemaMap = [("a__random_int", "random_int")].into_iter().collect();
        workflow
            .generate_base_artifact(Some("artifact_4"), &schema, 3)
            .expect("base");
        let next = workflow
            .generate_base_artifact(None, &schema, 3)
            .expect("base");
        assert_eq!(next, "artifact_5");
        assert!(
            workflow
                .generate_base_artifact(Some("artifact_4"), &schema, 3)
                .is_err()
        );
    }

    #[test]
    fn infeasible_chain_is_rejected_before_execution() {
        let mut workflow = workflow("infeasible");
        workflow.bootstrap(3, 20).expect("bootstrap");
        let chain = vec![
            OpStep::Sample(SampleArgs { frac: 0.5 }),
            OpStep::Merge(forkbench_core::MergeArgs {
                key_col: "missing".to_string(),
            }),
        ];
        assert!(matches!(
            workflow.execute_operation(&["artifact_0"], chain, None),
            Err(WorkflowError::InvalidOperation { .. })
        ));
        assert_eq!(workflow.artifact_count(), 1);
        assert!(workflow.log().operation_list.is_empty());
    }

    #[test]
    fn generate_requires_bootstrap() {
        let mut workflow = workflow("unbootstrapped");
        assert!(matches!(
            workflow.generate(&GenerateRequest::default()),
            Err(WorkflowError::InvalidState(_))
        ));
    }
}
