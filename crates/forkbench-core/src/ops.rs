//! Operation vocabulary shared by the generator, the backends and the
//! persisted operation log.
//!
//! An [`OpStep`] serializes as `{"op": "<kind>", "args": {...}}`, which is the
//! shape of every entry of an operation record's `op_list`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::SchemaMap;
use crate::value::Value;

/// Kind of a transformation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Sample,
    Apply,
    Groupby,
    Project,
    Select,
    Merge,
    Pivot,
    Fill,
}

impl OpKind {
    pub const ALL: [OpKind; 8] = [
        OpKind::Sample,
        OpKind::Apply,
        OpKind::Groupby,
        OpKind::Project,
        OpKind::Select,
        OpKind::Merge,
        OpKind::Pivot,
        OpKind::Fill,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Sample => "sample",
            OpKind::Apply => "apply",
            OpKind::Groupby => "groupby",
            OpKind::Project => "project",
            OpKind::Select => "select",
            OpKind::Merge => "merge",
            OpKind::Pivot => "pivot",
            OpKind::Fill => "fill",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        OpKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| Error::InvalidOperation(format!("unknown operation '{value}'")))
    }
}

/// Aggregate used by `groupby` and `pivot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunction {
    Min,
    Max,
    Sum,
    Mean,
    Count,
}

impl AggFunction {
    pub const ALL: [AggFunction; 5] = [
        AggFunction::Min,
        AggFunction::Max,
        AggFunction::Sum,
        AggFunction::Mean,
        AggFunction::Count,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggFunction::Min => "min",
            AggFunction::Max => "max",
            AggFunction::Sum => "sum",
            AggFunction::Mean => "mean",
            AggFunction::Count => "count",
        }
    }
}

/// Comparison used by `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparator {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }

    /// Whether `cell <comparator> literal` holds. A null literal only
    /// matches through `==` (cell is null) and `!=` (cell is not null); a
    /// null cell never matches a non-null literal.
    pub fn matches(self, cell: &Value, literal: &Value) -> bool {
        match (cell.is_null(), literal.is_null()) {
            (is_null, true) => match self {
                Comparator::Eq => is_null,
                Comparator::Ne => !is_null,
                _ => false,
            },
            (true, false) => false,
            (false, false) => self.holds(cell.compare(literal)),
        }
    }

    /// Whether an observed ordering satisfies the comparator. Incomparable
    /// values only satisfy `!=`.
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Comparator::Ne, None) => true,
            (_, None) => false,
            (Comparator::Eq, Some(ord)) => ord == Ordering::Equal,
            (Comparator::Ne, Some(ord)) => ord != Ordering::Equal,
            (Comparator::Lt, Some(ord)) => ord == Ordering::Less,
            (Comparator::Le, Some(ord)) => ord != Ordering::Greater,
            (Comparator::Gt, Some(ord)) => ord == Ordering::Greater,
            (Comparator::Ge, Some(ord)) => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleArgs {
    pub frac: f64,
}

/// Linear `a·x + b` transform of one numeric column into a new column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyArgs {
    pub numeric_col: String,
    pub a: f64,
    pub b: f64,
}

impl ApplyArgs {
    pub fn output_column(&self) -> String {
        format!("{}__{}x_{}", self.numeric_col, self.a, self.b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupbyArgs {
    pub group_columns: Vec<String>,
    pub agg_columns: Vec<String>,
    pub agg_function: AggFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectArgs {
    pub output_cols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectArgs {
    pub column: String,
    pub comparator: Comparator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeArgs {
    pub key_col: String,
}

/// Pivot arguments. Index and column lists keep the list form of the
/// operation log; backends accept exactly one pivot column and one value
/// column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotArgs {
    pub index_cols: Vec<String>,
    pub columns: Vec<String>,
    pub value_col: Vec<String>,
    pub agg_func: AggFunction,
}

impl PivotArgs {
    /// Label of the output column holding `value_col` for one distinct value
    /// of the pivot column.
    pub fn output_column(value_col: &str, pivot_value: &Value) -> String {
        let rendered = match pivot_value {
            Value::Text(text) => text.clone(),
            other => other.to_csv(),
        };
        format!("{value_col}[{rendered}]")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillArgs {
    pub col_name: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// One fully-parameterized transformation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum OpStep {
    Sample(SampleArgs),
    Apply(ApplyArgs),
    Groupby(GroupbyArgs),
    Project(ProjectArgs),
    Select(SelectArgs),
    Merge(MergeArgs),
    Pivot(PivotArgs),
    Fill(FillArgs),
}

impl OpStep {
    pub fn kind(&self) -> OpKind {
        match self {
            OpStep::Sample(_) => OpKind::Sample,
            OpStep::Apply(_) => OpKind::Apply,
            OpStep::Groupby(_) => OpKind::Groupby,
            OpStep::Project(_) => OpKind::Project,
            OpStep::Select(_) => OpKind::Select,
            OpStep::Merge(_) => OpKind::Merge,
            OpStep::Pivot(_) => OpKind::Pivot,
            OpStep::Fill(_) => OpKind::Fill,
        }
    }

    /// Arguments as a JSON object, for error reports and logs.
    pub fn args_json(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut value| value.get_mut("args").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }

    /// Schema produced by this step, or `None` when it depends on the data
    /// (pivot). `partner` is the right-hand schema of a merge.
    pub fn plan_schema(
        &self,
        input: &SchemaMap,
        partner: Option<&SchemaMap>,
    ) -> Result<Option<SchemaMap>> {
        match self {
            OpStep::Sample(args) => {
                if !(args.frac > 0.0 && args.frac <= 1.0) {
                    return Err(Error::InvalidOperation(format!(
                        "sample fraction {} outside (0, 1]",
                        args.frac
                    )));
                }
                Ok(Some(input.clone()))
            }
            OpStep::Apply(args) => {
                require_columns(input, "apply", [&args.numeric_col])?;
                let mut output = input.clone();
                let kind = input.kind_of(&args.numeric_col).unwrap_or_default().to_string();
                output.insert(args.output_column(), kind);
                Ok(Some(output))
            }
            OpStep::Groupby(args) => {
                if args.group_columns.is_empty() {
                    return Err(Error::InvalidOperation(
                        "groupby needs at least one group column".to_string(),
                    ));
                }
                require_columns(
                    input,
                    "groupby",
                    args.group_columns.iter().chain(&args.agg_columns),
                )?;
                let keep: Vec<&String> = args
                    .group_columns
                    .iter()
                    .chain(&args.agg_columns)
                    .collect();
                Ok(Some(input.retain_labels(&keep)))
            }
            OpStep::Project(args) => {
                if args.output_cols.is_empty() {
                    return Err(Error::InvalidOperation(
                        "project must keep at least one column".to_string(),
                    ));
                }
                require_columns(input, "project", &args.output_cols)?;
                Ok(Some(input.retain_labels(&args.output_cols)))
            }
            OpStep::Select(args) => {
                require_columns(input, "select", [&args.column])?;
                Ok(Some(input.clone()))
            }
            OpStep::Merge(args) => {
                let partner = partner.ok_or_else(|| {
                    Error::InvalidOperation("merge needs a second source".to_string())
                })?;
                require_columns(input, "merge", [&args.key_col])?;
                require_columns(partner, "merge", [&args.key_col])?;
                let mut output = input.clone();
                for (label, kind) in partner.iter() {
                    if !output.contains(label) {
                        output.insert(label, kind);
                    }
                }
                Ok(Some(output))
            }
            OpStep::Pivot(args) => {
                if args.index_cols.is_empty() || args.columns.len() != 1 || args.value_col.len() != 1
                {
                    return Err(Error::InvalidOperation(
                        "pivot needs index columns, one pivot column and one value column"
                            .to_string(),
                    ));
                }
                require_columns(
                    input,
                    "pivot",
                    args.index_cols
                        .iter()
                        .chain(&args.columns)
                        .chain(&args.value_col),
                )?;
                Ok(None)
            }
            OpStep::Fill(args) => {
                require_columns(input, "fill", [&args.col_name])?;
                Ok(Some(input.clone()))
            }
        }
    }
}

/// Validate a chain of steps against its source schemas and compute the
/// schema of the materialized result (`None` when the chain ends in a pivot).
///
/// A merge must be the first step and is the only step that consumes two
/// sources; a pivot must be the last step.
pub fn plan_chain(steps: &[OpStep], sources: &[&SchemaMap]) -> Result<Option<SchemaMap>> {
    let Some(first) = steps.first() else {
        return Err(Error::InvalidOperation("empty operation chain".to_string()));
    };
    let expected_sources = if first.kind() == OpKind::Merge { 2 } else { 1 };
    if sources.len() != expected_sources {
        return Err(Error::InvalidOperation(format!(
            "{} expects {expected_sources} source(s), got {}",
            first.kind(),
            sources.len()
        )));
    }

    let mut current = sources[0].clone();
    let mut result = Some(current.clone());
    for (position, step) in steps.iter().enumerate() {
        if position > 0 && step.kind() == OpKind::Merge {
            return Err(Error::InvalidOperation(
                "merge can only start an operation chain".to_string(),
            ));
        }
        if step.kind() == OpKind::Pivot && position + 1 != steps.len() {
            return Err(Error::InvalidOperation(
                "pivot must be the last step of an operation chain".to_string(),
            ));
        }
        let partner = if position == 0 { sources.get(1).copied() } else { None };
        result = step.plan_schema(&current, partner)?;
        if let Some(schema) = &result {
            current = schema.clone();
        }
    }

    Ok(result)
}

fn require_columns<I, S>(schema: &SchemaMap, op: &str, columns: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for column in columns {
        let column = column.as_ref();
        if !schema.contains(column) {
            return Err(Error::InvalidOperation(format!(
                "{op} references missing column '{column}'"
            )));
        }
    }
    Ok(())
}
