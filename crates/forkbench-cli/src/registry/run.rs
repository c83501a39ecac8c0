use std::fs::{OpenOptions, create_dir_all};
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use forkbench_core::OpKind;
use forkbench_workflow::BackendKind;
use indexmap::IndexMap;
use serde::Serialize;

use super::{RegistryError, RegistryResult};

/// Serializable options of the command that started a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RunOptions {
    Generate {
        name: String,
        backend: BackendKind,
        columns: usize,
        rows: usize,
        versions: usize,
        branching_factor: f64,
        excluded_ops: Vec<OpKind>,
        join_rows: Option<usize>,
        taxonomy: Option<PathBuf>,
    },
    Replay {
        name: String,
        backend: BackendKind,
        input_dir: PathBuf,
        rescale: IndexMap<String, usize>,
        taxonomy: Option<PathBuf>,
    },
}

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub out_dir: PathBuf,
    pub seed: u64,
    pub options: RunOptions,
}

/// JSON config written next to the workflow outputs.
#[derive(Debug, Serialize)]
pub struct RunConfig {
    pub run_id: String,
    pub started_at: String,
    pub seed: u64,
    pub options: RunOptions,
    pub git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
pub struct GitInfo {
    pub commit: Option<String>,
    pub dirty: Option<bool>,
}

/// Paths for run bookkeeping files.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub config_path: PathBuf,
    pub logs_path: PathBuf,
}

pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    create_dir_all(&ctx.out_dir)?;

    let config_path = ctx.out_dir.join("config.json");
    let logs_path = ctx.out_dir.join("logs.ndjson");

    let config = RunConfig {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        seed: ctx.seed,
        options: ctx.options.clone(),
        git: collect_git_info(),
    };

    write_json(&config_path, &config)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&logs_path)?;

    Ok(RunPaths {
        config_path,
        logs_path,
    })
}

pub fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    serde_json::to_writer_pretty(file, value).map_err(RegistryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_run_writes_config_and_log_file() {
        let out_dir = std::env::temp_dir().join(format!(
            "forkbench_cli_run_{}",
            uuid::Uuid::new_v4()
        ));
        let ctx = RunContext {
            run_id: "run-1".to_string(),
            started_at: Utc::now(),
            out_dir: out_dir.clone(),
            seed: 42,
            options: RunOptions::Generate {
                name: "wf".to_string(),
                backend: BackendKind::Memory,
                columns: 5,
                rows: 100,
                versions: 10,
                branching_factor: 5.0,
                excluded_ops: vec![OpKind::Merge],
                join_rows: None,
                taxonomy: None,
            },
        };

        let paths = start_run(&ctx).expect("start run");
        assert!(paths.logs_path.is_file());
        let raw = std::fs::read_to_string(&paths.config_path).expect("config");
        let config: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(config["seed"], 42);
        assert_eq!(config["options"]["command"], "generate");
        assert_eq!(config["options"]["excluded_ops"][0], "merge");
    }
}
