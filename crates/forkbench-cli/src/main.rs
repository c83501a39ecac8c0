mod registry;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use forkbench_core::{ColumnTaxonomy, Error as CoreError, OpKind};
use forkbench_workflow::{
    BackendKind, GenerateRequest, Workflow, WorkflowError, WorkflowOptions, load_workflow,
};
use indexmap::IndexMap;
use registry::{RunContext, RunOptions, init_run_logging, start_run};
use settings::{Settings, SettingsError, load_settings};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_OUT_DIR: &str = "dataset";
const DEFAULT_COLUMNS: usize = 20;
const DEFAULT_ROWS: usize = 1000;
const DEFAULT_VERSIONS: usize = 10;
const DEFAULT_BFACTOR: f64 = 5.0;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Parser, Debug)]
#[command(
    name = "forkbench",
    version,
    about = "Synthesize branching data-transformation workflows"
)]
struct Cli {
    /// Settings file supplying defaults (default: ./forkbench.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new workflow.
    Generate(GenerateArgs),
    /// Replay a previously generated workflow.
    Replay(ReplayArgs),
    /// Print the column taxonomy.
    Taxonomy(TaxonomyArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Execution backend: memory or sqlite.
    #[arg(long)]
    backend: Option<BackendKind>,
    /// Directory where the workflow is written.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Prefix of every output document.
    #[arg(long)]
    name: Option<String>,
    /// Column taxonomy TOML file (default: built-in taxonomy).
    #[arg(long)]
    taxonomy: Option<PathBuf>,
    /// Log level or filter directive.
    #[arg(long)]
    log: Option<String>,
    /// Overwrite an existing workflow in the output directory.
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Number of columns in the base artifact.
    #[arg(long)]
    columns: Option<usize>,
    /// Number of rows in the base artifact.
    #[arg(long)]
    rows: Option<usize>,
    /// Number of artifacts to generate.
    #[arg(long)]
    versions: Option<usize>,
    /// Branching factor: near 0 picks sources uniformly, large values favour the newest artifacts.
    #[arg(long, allow_negative_numbers = true)]
    bfactor: Option<f64>,
    /// Operations never proposed, e.g. `merge,pivot`.
    #[arg(long, value_delimiter = ',')]
    exclude_ops: Vec<OpKind>,
    /// Row count of synthesized join partners (random when absent).
    #[arg(long)]
    join_rows: Option<usize>,
    /// Seed of the workflow RNG (random when absent).
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Directory of the workflow to replay.
    #[arg(long)]
    input_dir: PathBuf,
    /// Regenerate a base artifact with a new row count, e.g. `artifact_0=100000`.
    #[arg(long, value_name = "LABEL=ROWS", value_parser = parse_scale)]
    scale: Vec<(String, usize)>,
    /// Seed used for regenerated bases and sampling.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct TaxonomyArgs {
    /// Column taxonomy TOML file (default: built-in taxonomy).
    #[arg(long)]
    taxonomy: Option<PathBuf>,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Generate(args) => run_generate(args, settings),
        Command::Replay(args) => run_replay(args, settings),
        Command::Taxonomy(args) => run_taxonomy(args, settings),
    }
}

fn run_generate(args: GenerateArgs, settings: Settings) -> Result<(), CliError> {
    let GenerateArgs {
        common,
        columns,
        rows,
        versions,
        bfactor,
        exclude_ops,
        join_rows,
        seed,
    } = args;
    let defaults = settings.generate.clone();

    let name = common
        .name
        .clone()
        .or(defaults.name)
        .unwrap_or_else(default_name);
    let out_dir = resolve_out_dir(&common, &settings);
    let backend = common.backend.or(settings.backend).unwrap_or_default();
    let taxonomy_path = common.taxonomy.clone().or(settings.taxonomy.clone());
    let columns = columns.or(defaults.columns).unwrap_or(DEFAULT_COLUMNS);
    let rows = rows.or(defaults.rows).unwrap_or(DEFAULT_ROWS);
    let versions = versions.or(defaults.versions).unwrap_or(DEFAULT_VERSIONS);
    let bfactor = bfactor.or(defaults.bfactor).unwrap_or(DEFAULT_BFACTOR);
    let exclude_ops = if exclude_ops.is_empty() {
        defaults.exclude_ops.unwrap_or_default()
    } else {
        exclude_ops
    };
    let join_rows = join_rows.or(defaults.join_rows);
    let seed = seed.or(defaults.seed).unwrap_or_else(rand::random);

    if columns == 0 || rows == 0 || versions == 0 {
        return Err(CliError::InvalidConfig(
            "columns, rows and versions must be positive".to_string(),
        ));
    }
    prepare_out_dir(&out_dir, common.force)?;

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        out_dir: out_dir.clone(),
        seed,
        options: RunOptions::Generate {
            name: name.clone(),
            backend,
            columns,
            rows,
            versions,
            branching_factor: bfactor,
            excluded_ops: exclude_ops.clone(),
            join_rows,
            taxonomy: taxonomy_path.clone(),
        },
    };
    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path, &log_level(&common, &settings))?;

    tracing::info!(
        event = "run_started",
        run_id = %run_id,
        command = "generate",
        seed,
        config = %run_paths.config_path.display()
    );
    let timer = Instant::now();

    let taxonomy = Arc::new(load_taxonomy(taxonomy_path.as_deref())?);
    let options = WorkflowOptions {
        name,
        out_dir: out_dir.clone(),
        seed: Some(seed),
        backend,
    };
    let mut workflow = Workflow::new(&options, taxonomy)?;

    let mut excluded_ops = exclude_ops;
    for kind in workflow.unsupported_kinds() {
        if !excluded_ops.contains(&kind) {
            tracing::info!(
                event = "op_excluded",
                op = %kind,
                backend = %backend,
                "backend cannot execute operation, excluding it"
            );
            excluded_ops.push(kind);
        }
    }

    workflow.bootstrap(columns, rows)?;
    let request = GenerateRequest {
        target_count: versions,
        branching_factor: bfactor,
        excluded_ops,
        join_rows,
        ..GenerateRequest::default()
    };
    let outcome = workflow.generate(&request)?;

    tracing::info!(
        event = "run_finished",
        status = "success",
        state = ?outcome.state,
        artifacts = outcome.artifacts,
        duration_ms = timer.elapsed().as_millis() as u64
    );
    println!(
        "Workflow '{}' written to {} ({} artifacts). Replay it with: forkbench replay --input-dir {}",
        workflow.name(),
        out_dir.display(),
        outcome.artifacts,
        out_dir.display()
    );
    Ok(())
}

fn run_replay(args: ReplayArgs, settings: Settings) -> Result<(), CliError> {
    let ReplayArgs {
        common,
        input_dir,
        scale,
        seed,
    } = args;

    let loaded = load_workflow(&input_dir)?;
    let name = common.name.clone().unwrap_or_else(|| loaded.log.name.clone());
    let out_dir = resolve_out_dir(&common, &settings);
    if same_dir(&out_dir, &input_dir) {
        return Err(CliError::InvalidConfig(
            "replay output directory must differ from the input directory".to_string(),
        ));
    }
    let backend = common.backend.or(settings.backend).unwrap_or_default();
    let taxonomy_path = common.taxonomy.clone().or(settings.taxonomy.clone());
    let rescale: IndexMap<String, usize> = scale.into_iter().collect();
    let seed = seed.unwrap_or_else(rand::random);

    prepare_out_dir(&out_dir, common.force)?;

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        out_dir: out_dir.clone(),
        seed,
        options: RunOptions::Replay {
            name: name.clone(),
            backend,
            input_dir: input_dir.clone(),
            rescale: rescale.clone(),
            taxonomy: taxonomy_path.clone(),
        },
    };
    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path, &log_level(&common, &settings))?;

    tracing::info!(
        event = "run_started",
        run_id = %run_id,
        command = "replay",
        input_dir = %input_dir.display(),
        config = %run_paths.config_path.display()
    );
    let timer = Instant::now();

    let taxonomy = Arc::new(load_taxonomy(taxonomy_path.as_deref())?);
    let options = WorkflowOptions {
        name,
        out_dir: out_dir.clone(),
        seed: Some(seed),
        backend,
    };
    let mut workflow = Workflow::new(&options, taxonomy)?;
    let replayed = workflow.replay(&loaded.log, &loaded.schemas, &loaded.input_dir, &rescale)?;
    workflow.serialize_workflow()?;

    tracing::info!(
        event = "run_finished",
        status = "success",
        replayed,
        duration_ms = timer.elapsed().as_millis() as u64
    );
    println!(
        "Replayed {replayed} operations of '{}' into {}",
        loaded.log.name,
        out_dir.display()
    );
    Ok(())
}

fn run_taxonomy(args: TaxonomyArgs, settings: Settings) -> Result<(), CliError> {
    let path = args.taxonomy.or(settings.taxonomy);
    let taxonomy = load_taxonomy(path.as_deref())?;
    for category in taxonomy.categories() {
        let kinds: Vec<&str> = taxonomy.kinds_in(category).collect();
        println!("{category}: {}", kinds.join(", "));
    }
    Ok(())
}

fn load_taxonomy(path: Option<&Path>) -> Result<ColumnTaxonomy, CliError> {
    let taxonomy = match path {
        Some(path) => ColumnTaxonomy::load(path)?,
        None => ColumnTaxonomy::builtin()?,
    };
    Ok(taxonomy)
}

fn resolve_out_dir(common: &CommonArgs, settings: &Settings) -> PathBuf {
    common
        .out_dir
        .clone()
        .or_else(|| settings.out_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR))
}

fn log_level(common: &CommonArgs, settings: &Settings) -> String {
    common
        .log
        .clone()
        .or_else(|| settings.log.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

fn default_name() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Refuse to write over an existing workflow unless `force` is set, in which
/// case the old output directory is removed.
fn prepare_out_dir(out_dir: &Path, force: bool) -> Result<(), CliError> {
    if out_dir.join("artifacts").exists() {
        if !force {
            return Err(CliError::InvalidConfig(format!(
                "a workflow already exists in {}; pass --force to overwrite it",
                out_dir.display()
            )));
        }
        std::fs::remove_dir_all(out_dir)?;
    }
    std::fs::create_dir_all(out_dir)?;
    Ok(())
}

fn same_dir(left: &Path, right: &Path) -> bool {
    match (left.canonicalize(), right.canonicalize()) {
        (Ok(left), Ok(right)) => left == right,
        _ => left == right,
    }
}

fn parse_scale(raw: &str) -> Result<(String, usize), String> {
    let (label, rows) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected LABEL=ROWS, got '{raw}'"))?;
    let label = label.trim();
    if label.is_empty() {
        return Err(format!("missing artifact label in '{raw}'"));
    }
    let rows = rows
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("invalid row count in '{raw}': {err}"))?;
    Ok((label.to_string(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_directives_parse() {
        assert_eq!(
            parse_scale("artifact_0=100000"),
            Ok(("artifact_0".to_string(), 100_000))
        );
        assert!(parse_scale("artifact_0").is_err());
        assert!(parse_scale("=5").is_err());
        assert!(parse_scale("artifact_0=lots").is_err());
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "forkbench",
            "generate",
            "--backend",
            "sqlite",
            "--versions",
            "15",
            "--bfactor",
            "-1.5",
            "--exclude-ops",
            "merge,pivot",
        ])
        .expect("parse");
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.common.backend, Some(BackendKind::Sqlite));
        assert_eq!(args.versions, Some(15));
        assert_eq!(args.bfactor, Some(-1.5));
        assert_eq!(args.exclude_ops, vec![OpKind::Merge, OpKind::Pivot]);
    }

    #[test]
    fn existing_workflow_needs_force() {
        let out_dir = std::env::temp_dir().join(format!("forkbench_cli_{}", Uuid::new_v4()));
        std::fs::create_dir_all(out_dir.join("artifacts")).expect("artifacts dir");
        assert!(matches!(
            prepare_out_dir(&out_dir, false),
            Err(CliError::InvalidConfig(_))
        ));
        prepare_out_dir(&out_dir, true).expect("force");
        assert!(!out_dir.join("artifacts").exists());
        assert!(out_dir.is_dir());
    }
}
