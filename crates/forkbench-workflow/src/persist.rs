use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::WorkflowResult;

/// Directory holding one snapshot file per artifact.
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const OPERATIONS_SUFFIX: &str = "_operations.json";
pub const GRAPH_SUFFIX: &str = "_gt_graph.csv";
pub const SCHEMA_MAP_SUFFIX: &str = "_schema_map.json";
pub const PERF_SUFFIX: &str = "_perf.csv";

/// Locations of the documents a workflow writes under its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPaths {
    root: PathBuf,
    name: String,
}

impl WorkflowPaths {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    pub fn snapshot(&self, label: &str, extension: &str) -> PathBuf {
        self.artifacts_dir().join(format!("{label}.{extension}"))
    }

    pub fn operations(&self) -> PathBuf {
        self.document(OPERATIONS_SUFFIX)
    }

    pub fn graph(&self) -> PathBuf {
        self.document(GRAPH_SUFFIX)
    }

    pub fn schema_map(&self) -> PathBuf {
        self.document(SCHEMA_MAP_SUFFIX)
    }

    pub fn perf(&self) -> PathBuf {
        self.document(PERF_SUFFIX)
    }

    fn document(&self, suffix: &str) -> PathBuf {
        self.root.join(format!("{}{suffix}", self.name))
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> WorkflowResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> WorkflowResult<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
