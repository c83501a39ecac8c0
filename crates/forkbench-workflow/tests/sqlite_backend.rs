use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use forkbench_core::{
    AggFunction, ApplyArgs, ColumnTaxonomy, OpKind, OpStep, PivotArgs, SchemaMap,
};
use forkbench_workflow::{
    BackendKind, GenerateRequest, Workflow, WorkflowError, WorkflowOptions, WorkflowState,
};

fn temp_out_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "forkbench_sqlite_wf_{label}_{}",
        uuid::Uuid::new_v4()
    ));
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn sqlite_workflow(label: &str, seed: u64) -> (WorkflowOptions, Workflow) {
    let options = WorkflowOptions {
        name: "sql".to_string(),
        out_dir: temp_out_dir(label),
        seed: Some(seed),
        backend: BackendKind::Sqlite,
    };
    let taxonomy = Arc::new(ColumnTaxonomy::builtin().expect("taxonomy"));
    let workflow = Workflow::new(&options, taxonomy).expect("workflow");
    (options, workflow)
}

#[test]
fn sqlite_generates_without_pivot() {
    let (options, mut workflow) = sqlite_workflow("generate", 6);
    assert_eq!(workflow.unsupported_kinds(), vec![OpKind::Pivot]);
    workflow.bootstrap(6, 50).expect("bootstrap");
    let request = GenerateRequest {
        target_count: 6,
        excluded_ops: workflow.unsupported_kinds(),
        ..GenerateRequest::default()
    };
    let outcome = workflow.generate(&request).expect("generate");
    assert_eq!(outcome.state, WorkflowState::Complete);
    assert!(options.out_dir.join("sql.db").is_file());
    assert!(options.out_dir.join("artifacts").join("artifact_0.csv").is_file());
    for (_, _, edge) in workflow.graph().edges() {
        assert!(edge.code.starts_with("CREATE TABLE"));
    }
}

#[test]
fn pivot_on_sqlite_is_unsupported_and_not_flushed() {
    let (options, mut workflow) = sqlite_workflow("pivot", 2);
    let schema: SchemaMap = [
        ("a__city", "city"),
        ("b__country", "country"),
        ("c__random_int", "random_int"),
    ]
    .into_iter()
    .collect();
    workflow
        .generate_base_artifact(None, &schema, 20)
        .expect("base");
    let step = OpStep::Pivot(PivotArgs {
        index_cols: vec!["a__city".to_string()],
        columns: vec!["b__country".to_string()],
        value_col: vec!["c__random_int".to_string()],
        agg_func: AggFunction::Mean,
    });

    let err = workflow.execute_operation(&["artifact_0"], vec![step], None);
    assert!(matches!(
        err,
        Err(WorkflowError::Unsupported {
            op: OpKind::Pivot,
            ..
        })
    ));
    assert_eq!(workflow.state(), WorkflowState::Failed);
    assert!(workflow.log().operation_list.is_empty());
    assert!(!options.out_dir.join("sql_operations.json").exists());
}

#[test]
fn apply_on_text_column_fails_on_every_backend() {
    let schema: SchemaMap = [("a__name", "name"), ("b__random_int", "random_int")]
        .into_iter()
        .collect();
    let step = OpStep::Apply(ApplyArgs {
        numeric_col: "a__name".to_string(),
        a: 3.0,
        b: 0.5,
    });
    for backend in [BackendKind::Memory, BackendKind::Sqlite] {
        let options = WorkflowOptions {
            name: "sql".to_string(),
            out_dir: temp_out_dir("apply_text"),
            seed: Some(8),
            backend,
        };
        let taxonomy = Arc::new(ColumnTaxonomy::builtin().expect("taxonomy"));
        let mut workflow = Workflow::new(&options, taxonomy).expect("workflow");
        workflow
            .generate_base_artifact(None, &schema, 10)
            .expect("base");

        let err = workflow.execute_operation(&["artifact_0"], vec![step.clone()], None);
        assert!(
            matches!(err, Err(WorkflowError::Backend { ref op, .. }) if op == "apply"),
            "{backend:?}"
        );
        assert_eq!(workflow.state(), WorkflowState::Failed);
        assert_eq!(workflow.artifact_count(), 1);
        assert!(!workflow.graph().contains("artifact_1"));
    }
}
