use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use forkbench_core::{ColumnTaxonomy, OpKind, OpStep, OperationRecord, SampleArgs};
use forkbench_workflow::{
    GenerateRequest, Workflow, WorkflowError, WorkflowOptions, WorkflowState, load_workflow,
    persist::write_json, replay_workflow,
};
use indexmap::IndexMap;

fn temp_out_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "forkbench_replay_{label}_{}",
        uuid::Uuid::new_v4()
    ));
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn taxonomy() -> Arc<ColumnTaxonomy> {
    Arc::new(ColumnTaxonomy::builtin().expect("taxonomy"))
}

fn generated(label: &str, seed: u64, request: &GenerateRequest) -> (WorkflowOptions, Workflow) {
    let options = WorkflowOptions {
        name: "bench".to_string(),
        out_dir: temp_out_dir(label),
        seed: Some(seed),
        ..WorkflowOptions::default()
    };
    let mut workflow = Workflow::new(&options, taxonomy()).expect("workflow");
    workflow.bootstrap(8, 60).expect("bootstrap");
    workflow.generate(request).expect("generate");
    (options, workflow)
}

#[test]
fn replay_reproduces_labels_and_edges() {
    for seed in [1, 4, 9] {
        let request = GenerateRequest {
            target_count: 8,
            branching_factor: 1.5,
            ..GenerateRequest::default()
        };
        let (options, original) = generated("round_trip", seed, &request);

        let replay_options = WorkflowOptions {
            out_dir: temp_out_dir("round_trip_out"),
            seed: Some(seed + 100),
            ..options.clone()
        };
        let replayed = replay_workflow(
            &replay_options,
            taxonomy(),
            &options.out_dir,
            &IndexMap::new(),
        )
        .expect("replay");

        assert_eq!(replayed.state(), WorkflowState::Complete);
        let original_labels: Vec<&str> = original.graph().node_labels().collect();
        let mut replayed_labels: Vec<&str> = replayed.graph().node_labels().collect();
        let mut sorted_original = original_labels.clone();
        sorted_original.sort();
        replayed_labels.sort();
        assert_eq!(sorted_original, replayed_labels, "seed {seed}");
        assert_eq!(
            original.graph().edge_signatures(),
            replayed.graph().edge_signatures(),
            "seed {seed}"
        );
        assert_eq!(original.log().operation_list, replayed.log().operation_list);
        assert!(replay_options.out_dir.join("bench_operations.json").is_file());
    }
}

#[test]
fn rescaled_base_is_regenerated_with_new_row_count() {
    let request = GenerateRequest {
        target_count: 5,
        branching_factor: 5.0,
        excluded_ops: vec![OpKind::Merge, OpKind::Pivot],
        ..GenerateRequest::default()
    };
    let (options, original) = generated("rescale", 21, &request);
    let base_schema = original
        .artifact("artifact_0")
        .expect("base")
        .schema_map
        .clone();

    let replay_options = WorkflowOptions {
        out_dir: temp_out_dir("rescale_out"),
        ..options.clone()
    };
    let rescale = IndexMap::from([("artifact_0".to_string(), 300)]);
    let replayed =
        replay_workflow(&replay_options, taxonomy(), &options.out_dir, &rescale).expect("replay");

    let base = replayed.artifact("artifact_0").expect("base");
    assert_eq!(base.row_count, 300);
    assert_eq!(base.schema_map, base_schema);
    assert_eq!(
        original.graph().edge_signatures(),
        replayed.graph().edge_signatures()
    );
    let generate_rows = replayed
        .perf()
        .records()
        .iter()
        .filter(|record| record.op == "generate")
        .count();
    assert_eq!(generate_rows, 1);
}

#[test]
fn missing_snapshot_is_a_lookup_failure() {
    let request = GenerateRequest {
        target_count: 3,
        excluded_ops: vec![OpKind::Merge],
        ..GenerateRequest::default()
    };
    let (options, _) = generated("missing_snapshot", 3, &request);
    fs::remove_file(options.out_dir.join("artifacts").join("artifact_0.csv")).expect("remove");

    let replay_options = WorkflowOptions {
        out_dir: temp_out_dir("missing_snapshot_out"),
        ..options.clone()
    };
    let err = replay_workflow(&replay_options, taxonomy(), &options.out_dir, &IndexMap::new());
    assert!(matches!(
        err,
        Err(WorkflowError::ReplayLookup { ref label, .. }) if label == "artifact_0"
    ));
}

#[test]
fn failed_records_are_skipped() {
    let request = GenerateRequest {
        target_count: 3,
        excluded_ops: vec![OpKind::Merge],
        ..GenerateRequest::default()
    };
    let (options, original) = generated("failed_record", 8, &request);

    let mut loaded = load_workflow(&options.out_dir).expect("load");
    loaded.log.push(
        OperationRecord::new(
            vec!["artifact_0".to_string()],
            "artifact_99",
            vec![OpStep::Sample(SampleArgs { frac: 0.5 })],
        )
        .failed(),
    );
    write_json(&options.out_dir.join("bench_operations.json"), &loaded.log).expect("rewrite");

    let replay_options = WorkflowOptions {
        out_dir: temp_out_dir("failed_record_out"),
        ..options.clone()
    };
    let replayed =
        replay_workflow(&replay_options, taxonomy(), &options.out_dir, &IndexMap::new())
            .expect("replay");
    assert!(replayed.artifact("artifact_99").is_none());
    assert_eq!(
        replayed.graph().edge_signatures(),
        original.graph().edge_signatures()
    );
}

#[test]
fn load_workflow_reports_missing_documents() {
    let empty = temp_out_dir("empty");
    assert!(matches!(
        load_workflow(&empty),
        Err(WorkflowError::MissingDocument { .. })
    ));
}
