use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ops::OpStep;
use crate::schema::SchemaMap;

/// Outcome marker for a record whose execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Error,
}

/// One executed (or attempted) operation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub sources: Vec<String>,
    pub new_label: String,
    pub op_list: Vec<OpStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OpStatus>,
}

impl OperationRecord {
    pub fn new(sources: Vec<String>, new_label: impl Into<String>, op_list: Vec<OpStep>) -> Self {
        Self {
            sources,
            new_label: new_label.into(),
            op_list,
            status: None,
        }
    }

    pub fn failed(mut self) -> Self {
        self.status = Some(OpStatus::Error);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == Some(OpStatus::Error)
    }

    /// Operation kinds joined with `+`, e.g. `select+project`.
    pub fn op_names(&self) -> String {
        self.op_list
            .iter()
            .map(|step| step.kind().as_str())
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// The `<name>_operations.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationLog {
    pub name: String,
    pub operation_list: Vec<OperationRecord>,
}

impl OperationLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation_list: Vec::new(),
        }
    }

    pub fn push(&mut self, record: OperationRecord) {
        self.operation_list.push(record);
    }

    /// Records that produced an artifact, in execution order.
    pub fn successful(&self) -> impl Iterator<Item = &OperationRecord> {
        self.operation_list.iter().filter(|record| !record.is_failed())
    }
}

/// The `<name>_schema_map.json` document: artifact label → schema map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaMapExport(pub IndexMap<String, SchemaMap>);

impl SchemaMapExport {
    pub fn get(&self, label: &str) -> Option<&SchemaMap> {
        self.0.get(label)
    }
}
