use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use forkbench_core::{ApplyArgs, ColumnTaxonomy, OpKind, OpStep, OperationLog, SchemaMap};
use forkbench_workflow::{
    GenerateRequest, Workflow, WorkflowError, WorkflowOptions, WorkflowState,
};

fn temp_out_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "forkbench_workflow_{label}_{}",
        uuid::Uuid::new_v4()
    ));
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn taxonomy() -> Arc<ColumnTaxonomy> {
    Arc::new(ColumnTaxonomy::builtin().expect("taxonomy"))
}

fn options(label: &str, seed: u64) -> WorkflowOptions {
    WorkflowOptions {
        name: "wf".to_string(),
        out_dir: temp_out_dir(label),
        seed: Some(seed),
        ..WorkflowOptions::default()
    }
}

#[test]
fn five_versions_without_merge_form_a_tree() {
    let mut workflow = Workflow::new(&options("tree", 11), taxonomy()).expect("workflow");
    workflow.bootstrap(6, 100).expect("bootstrap");
    let request = GenerateRequest {
        target_count: 5,
        branching_factor: 5.0,
        excluded_ops: vec![OpKind::Merge],
        ..GenerateRequest::default()
    };

    let outcome = workflow.generate(&request).expect("generate");
    assert_eq!(outcome.state, WorkflowState::Complete);
    assert_eq!(outcome.artifacts, 5);
    assert_eq!(workflow.graph().node_count(), 5);
    assert_eq!(workflow.graph().edge_count(), 4);
    assert_eq!(workflow.graph().roots(), vec!["artifact_0"]);
    assert!(workflow.graph().is_acyclic());

    let labels: Vec<&str> = workflow.graph().node_labels().collect();
    assert_eq!(
        labels,
        vec!["artifact_0", "artifact_1", "artifact_2", "artifact_3", "artifact_4"]
    );
    for record in &workflow.log().operation_list {
        assert!(record.op_list.iter().all(|step| step.kind() != OpKind::Merge));
    }
}

#[test]
fn merge_is_never_the_final_operation() {
    for seed in 0..12 {
        let mut workflow =
            Workflow::new(&options("final_merge", seed), taxonomy()).expect("workflow");
        workflow.bootstrap(8, 60).expect("bootstrap");
        let request = GenerateRequest {
            target_count: 7,
            branching_factor: 1.0,
            ..GenerateRequest::default()
        };
        let outcome = workflow.generate(&request).expect("generate");
        if outcome.state != WorkflowState::Complete {
            continue;
        }
        let last = workflow
            .log()
            .operation_list
            .last()
            .expect("at least one operation");
        assert_ne!(last.op_list[0].kind(), OpKind::Merge, "seed {seed}");
    }
}

fn merge_only_taxonomy() -> Arc<ColumnTaxonomy> {
    Arc::new(
        ColumnTaxonomy::from_categories([("joinable", vec!["uuid4"])]).expect("taxonomy"),
    )
}

#[test]
fn merge_is_rejected_when_two_or_fewer_artifacts_remain() {
    for target_count in [2, 3] {
        let mut workflow = Workflow::new(
            &options(&format!("merge_only_{target_count}"), 3),
            merge_only_taxonomy(),
        )
        .expect("workflow");
        workflow.bootstrap(1, 5).expect("bootstrap");
        let outcome = workflow
            .generate(&GenerateRequest {
                target_count,
                ..GenerateRequest::default()
            })
            .expect("generate");

        assert_eq!(outcome.state, WorkflowState::Exhausted, "target {target_count}");
        assert_eq!(outcome.artifacts, 1);
        assert!(outcome.rejected_final_merges > 0);
        assert!(workflow.log().operation_list.is_empty());
    }

    let mut workflow =
        Workflow::new(&options("merge_only_allowed", 3), merge_only_taxonomy()).expect("workflow");
    workflow.bootstrap(1, 5).expect("bootstrap");
    let outcome = workflow
        .generate(&GenerateRequest {
            target_count: 3,
            allow_final_merge: true,
            ..GenerateRequest::default()
        })
        .expect("generate");
    assert_eq!(outcome.state, WorkflowState::Complete);
    assert_eq!(outcome.rejected_final_merges, 0);
    let last = workflow.log().operation_list.last().expect("merge record");
    assert_eq!(last.op_list[0].kind(), OpKind::Merge);
}

#[test]
fn schema_less_artifact_is_skipped_not_used() {
    let mut workflow = Workflow::new(&options("schema_less", 9), taxonomy()).expect("workflow");
    workflow.bootstrap(6, 100).expect("bootstrap");
    let empty = workflow
        .generate_base_artifact(None, &SchemaMap::new(), 0)
        .expect("schema-less artifact");
    assert_eq!(empty, "artifact_1");

    let outcome = workflow
        .generate(&GenerateRequest {
            target_count: 6,
            branching_factor: 0.0,
            excluded_ops: vec![OpKind::Merge],
            ..GenerateRequest::default()
        })
        .expect("generate");
    assert_eq!(outcome.state, WorkflowState::Complete);
    assert_eq!(outcome.artifacts, 6);
    for record in &workflow.log().operation_list {
        assert!(!record.sources.contains(&empty), "{} used as a source", record.new_label);
    }
    assert_eq!(workflow.graph().in_degree(&empty), 0);
    assert!(workflow.graph().roots().contains(&"artifact_1"));
}

#[test]
fn only_bases_and_join_partners_are_roots() {
    for seed in 0..8 {
        let mut workflow =
            Workflow::new(&options("roots", seed), taxonomy()).expect("workflow");
        workflow.bootstrap(10, 80).expect("bootstrap");
        let request = GenerateRequest {
            target_count: 9,
            branching_factor: 0.5,
            ..GenerateRequest::default()
        };
        workflow.generate(&request).expect("generate");

        let mut bases: HashSet<String> = HashSet::from(["artifact_0".to_string()]);
        for record in workflow.log().successful() {
            if record.op_list[0].kind() == OpKind::Merge {
                bases.insert(record.sources[1].clone());
                assert_eq!(workflow.graph().in_degree(&record.new_label), 2);
            } else {
                assert_eq!(workflow.graph().in_degree(&record.new_label), 1);
            }
        }
        for root in workflow.graph().roots() {
            assert!(bases.contains(root), "seed {seed}: unexpected root {root}");
        }
        assert!(workflow.graph().is_acyclic());
    }
}

#[test]
fn generate_writes_every_document() {
    let options = options("documents", 5);
    let mut workflow = Workflow::new(&options, taxonomy()).expect("workflow");
    workflow.bootstrap(5, 40).expect("bootstrap");
    let request = GenerateRequest {
        target_count: 4,
        ..GenerateRequest::default()
    };
    let outcome = workflow.generate(&request).expect("generate");

    let root = &options.out_dir;
    for document in [
        "wf_operations.json",
        "wf_gt_graph.csv",
        "wf_schema_map.json",
        "wf_perf.csv",
    ] {
        assert!(root.join(document).is_file(), "missing {document}");
    }
    for artifact in workflow.artifacts() {
        let snapshot = root.join("artifacts").join(format!("{}.csv", artifact.label));
        assert!(snapshot.is_file(), "missing snapshot {}", artifact.label);
    }

    let raw = fs::read_to_string(root.join("wf_operations.json")).expect("operations");
    let log: OperationLog = serde_json::from_str(&raw).expect("parse operations");
    assert_eq!(log.name, "wf");
    assert_eq!(log.operation_list.len(), outcome.operations);

    let edges = fs::read_to_string(root.join("wf_gt_graph.csv")).expect("edges");
    assert_eq!(edges.lines().count(), workflow.graph().edge_count());
    for line in edges.lines() {
        let mut parts = line.split('\t');
        let (Some(source), Some(target), Some(payload)) =
            (parts.next(), parts.next(), parts.next())
        else {
            panic!("malformed edge line {line}");
        };
        assert!(parts.next().is_none(), "extra field in {line}");
        assert!(source.starts_with("artifact_") && target.starts_with("artifact_"));
        let payload: serde_json::Value = serde_json::from_str(payload).expect("payload");
        assert!(payload.get("code").is_some());
    }

    let perf = fs::read_to_string(root.join("wf_perf.csv")).expect("perf");
    assert!(perf.starts_with("src,dst,op,start_time,end_time,elapsed_time"));
}

#[test]
fn narrow_tiny_base_exhausts() {
    let mut workflow = Workflow::new(&options("exhausted", 2), taxonomy()).expect("workflow");
    let schema: SchemaMap = [("a__name", "name"), ("b__word", "word")]
        .into_iter()
        .collect();
    workflow
        .generate_base_artifact(None, &schema, 5)
        .expect("base");
    let err = workflow.generate(&GenerateRequest::default());
    assert!(matches!(err, Err(WorkflowError::InvalidState(_))));

    let mut workflow = Workflow::new(&options("exhausted", 2), taxonomy()).expect("workflow");
    workflow.bootstrap(2, 5).expect("bootstrap");
    let outcome = workflow
        .generate(&GenerateRequest {
            target_count: 3,
            excluded_ops: vec![OpKind::Merge, OpKind::Groupby, OpKind::Pivot],
            ..GenerateRequest::default()
        })
        .expect("generate");
    assert_eq!(outcome.state, WorkflowState::Exhausted);
    assert_eq!(outcome.artifacts, 1);
}

#[test]
fn same_seed_reproduces_the_workflow() {
    let request = GenerateRequest {
        target_count: 8,
        branching_factor: 2.0,
        ..GenerateRequest::default()
    };
    let mut logs = Vec::new();
    for run in ["first", "second"] {
        let mut workflow =
            Workflow::new(&options(&format!("seeded_{run}"), 77), taxonomy()).expect("workflow");
        workflow.bootstrap(7, 50).expect("bootstrap");
        workflow.generate(&request).expect("generate");
        logs.push(workflow.log().clone());
    }
    assert_eq!(logs[0], logs[1]);
}

#[test]
fn backend_failure_is_logged_and_flushed() {
    let options = options("backend_failure", 4);
    let mut workflow = Workflow::new(&options, taxonomy()).expect("workflow");
    let schema: SchemaMap = [("a__name", "name"), ("b__random_int", "random_int")]
        .into_iter()
        .collect();
    workflow
        .generate_base_artifact(None, &schema, 12)
        .expect("base");
    let step = OpStep::Apply(ApplyArgs {
        numeric_col: "a__name".to_string(),
        a: 2.0,
        b: 1.0,
    });

    let err = workflow.execute_operation(&["artifact_0"], vec![step], None);
    assert!(matches!(err, Err(WorkflowError::Backend { ref op, .. }) if op == "apply"));
    assert_eq!(workflow.state(), WorkflowState::Failed);

    let raw = fs::read_to_string(options.out_dir.join("wf_operations.json")).expect("flushed");
    let log: serde_json::Value = serde_json::from_str(&raw).expect("json");
    let record = &log["operation_list"][0];
    assert_eq!(record["status"], "error");
    assert_eq!(record["new_label"], "artifact_1");
    assert!(options.out_dir.join("artifacts").join("artifact_0.csv").is_file());
}
