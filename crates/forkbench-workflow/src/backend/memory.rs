use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use forkbench_core::{
    AggFunction, ApplyArgs, Comparator, FillArgs, GroupbyArgs, OpKind, OpStep, PivotArgs,
    SampleArgs, SchemaMap, SelectArgs, Value, plan_chain,
};
use forkbench_generate::{Frame, read_frame_csv, write_frame_csv};
use indexmap::IndexMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::{Backend, Execution, require_numeric};
use crate::errors::{BackendError, BackendResult};

/// Backend holding every artifact as an in-memory frame. Supports the full
/// operation vocabulary and renders dataframe-style code.
#[derive(Debug)]
pub struct MemoryBackend {
    tables: HashMap<String, Frame>,
    rng: ChaCha8Rng,
}

impl MemoryBackend {
    /// `seed` drives row sampling so a seeded workflow is reproducible.
    pub fn new(seed: u64) -> Self {
        Self {
            tables: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn table(&self, label: &str) -> BackendResult<&Frame> {
        self.tables
            .get(label)
            .ok_or_else(|| BackendError::MissingArtifact(label.to_string()))
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports(&self, _kind: OpKind) -> bool {
        true
    }

    fn materialize_base(&mut self, label: &str, frame: Frame) -> BackendResult<()> {
        self.tables.insert(label.to_string(), frame);
        Ok(())
    }

    fn execute(
        &mut self,
        sources: &[&str],
        chain: &[OpStep],
        new_label: &str,
    ) -> BackendResult<Execution> {
        let inputs = sources
            .iter()
            .map(|label| self.table(label).cloned())
            .collect::<BackendResult<Vec<_>>>()?;
        let schemas: Vec<&SchemaMap> = inputs.iter().map(Frame::schema).collect();
        plan_chain(chain, &schemas)?;

        let mut current = inputs[0].clone();
        let mut code = format!("{new_label} = {}", sources[0]);
        for (position, step) in chain.iter().enumerate() {
            let partner = if position == 0 { inputs.get(1) } else { None };
            current = run_step(&current, partner, step, &mut self.rng)?;
            code.push_str(&render_step(step, sources.get(1).copied()));
        }

        debug!(
            label = new_label,
            rows = current.row_count(),
            columns = current.column_count(),
            "materialized artifact in memory"
        );
        let execution = Execution {
            schema: current.schema().clone(),
            row_count: current.row_count(),
            code,
        };
        self.tables.insert(new_label.to_string(), current);
        Ok(execution)
    }

    fn row_count(&self, label: &str) -> BackendResult<usize> {
        Ok(self.table(label)?.row_count())
    }

    fn schema_of(&self, label: &str) -> BackendResult<SchemaMap> {
        Ok(self.table(label)?.schema().clone())
    }

    fn frame(&self, label: &str) -> BackendResult<Frame> {
        self.table(label).cloned()
    }

    fn serialize(&self, label: &str, path: &Path) -> BackendResult<()> {
        write_frame_csv(path, self.table(label)?)?;
        Ok(())
    }

    fn deserialize(&mut self, label: &str, path: &Path, schema: &SchemaMap) -> BackendResult<()> {
        let frame = read_frame_csv(path, schema)?;
        self.tables.insert(label.to_string(), frame);
        Ok(())
    }
}

fn run_step(
    input: &Frame,
    partner: Option<&Frame>,
    step: &OpStep,
    rng: &mut ChaCha8Rng,
) -> BackendResult<Frame> {
    match step {
        OpStep::Sample(args) => Ok(sample(input, args, rng)),
        OpStep::Apply(args) => apply(input, args),
        OpStep::Groupby(args) => groupby(input, args),
        OpStep::Project(args) => Ok(input.project(&args.output_cols)),
        OpStep::Select(args) => Ok(select(input, args)),
        OpStep::Merge(args) => {
            let partner = partner.ok_or_else(|| {
                BackendError::Execution("merge needs a second source".to_string())
            })?;
            merge(input, partner, &args.key_col)
        }
        OpStep::Pivot(args) => pivot(input, args),
        OpStep::Fill(args) => fill(input, args),
    }
}

fn column<'f>(frame: &'f Frame, label: &str) -> BackendResult<&'f [Value]> {
    frame
        .column(label)
        .ok_or_else(|| BackendError::Execution(format!("missing column '{label}'")))
}

fn sample(input: &Frame, args: &SampleArgs, rng: &mut ChaCha8Rng) -> Frame {
    let rows = input.row_count();
    let amount = ((rows as f64) * args.frac).round() as usize;
    let indices = rand::seq::index::sample(rng, rows, amount.min(rows)).into_vec();
    input.take_rows(&indices)
}

fn apply(input: &Frame, args: &ApplyArgs) -> BackendResult<Frame> {
    require_numeric(input.schema(), &args.numeric_col)?;
    let kind = input
        .schema()
        .kind_of(&args.numeric_col)
        .unwrap_or_default()
        .to_string();
    let values = column(input, &args.numeric_col)?
        .iter()
        .map(|value| match value {
            Value::Null => Ok(Value::Null),
            other => other.as_f64().map(|x| Value::Float(args.a * x + args.b)).ok_or_else(|| {
                BackendError::Execution(format!(
                    "apply on non-numeric value {other} in '{}'",
                    args.numeric_col
                ))
            }),
        })
        .collect::<BackendResult<Vec<_>>>()?;

    let mut output = input.clone();
    output.push_column(args.output_column(), kind, values)?;
    Ok(output)
}

fn groupby(input: &Frame, args: &GroupbyArgs) -> BackendResult<Frame> {
    let group_values = args
        .group_columns
        .iter()
        .map(|label| column(input, label))
        .collect::<BackendResult<Vec<_>>>()?;

    let mut groups: IndexMap<Vec<String>, (Vec<Value>, Vec<usize>)> = IndexMap::new();
    for row in 0..input.row_count() {
        let key_values: Vec<Value> = group_values
            .iter()
            .map(|values| values[row].clone())
            .collect();
        if key_values.iter().any(Value::is_null) {
            continue;
        }
        let key: Vec<String> = key_values.iter().map(Value::key).collect();
        groups
            .entry(key)
            .or_insert_with(|| (key_values, Vec::new()))
            .1
            .push(row);
    }
    let mut groups: Vec<(Vec<Value>, Vec<usize>)> = groups.into_values().collect();
    groups.sort_by(|left, right| compare_keys(&left.0, &right.0));

    let keep: Vec<&String> = args
        .group_columns
        .iter()
        .chain(&args.agg_columns)
        .collect();
    let schema = input.schema().retain_labels(&keep);
    let mut columns = Vec::with_capacity(schema.len());
    for label in schema.labels() {
        if let Some(position) = args.group_columns.iter().position(|group| group == label) {
            columns.push(groups.iter().map(|(key, _)| key[position].clone()).collect());
        } else {
            let values = column(input, label)?;
            let aggregated = groups
                .iter()
                .map(|(_, rows)| {
                    let cells: Vec<&Value> = rows.iter().map(|&row| &values[row]).collect();
                    aggregate(args.agg_function, &cells)
                })
                .collect::<BackendResult<Vec<_>>>()?;
            columns.push(aggregated);
        }
    }
    Ok(Frame::new(schema, columns)?)
}

fn select(input: &Frame, args: &SelectArgs) -> Frame {
    let indices: Vec<usize> = input
        .column(&args.column)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter(|(_, cell)| args.comparator.matches(cell, &args.value))
        .map(|(index, _)| index)
        .collect();
    input.take_rows(&indices)
}

fn merge(left: &Frame, right: &Frame, key_col: &str) -> BackendResult<Frame> {
    let mut right_rows: HashMap<String, Vec<usize>> = HashMap::new();
    for (row, value) in column(right, key_col)?.iter().enumerate() {
        if !value.is_null() {
            right_rows.entry(value.key()).or_default().push(row);
        }
    }

    let extra: Vec<(&str, &str)> = right
        .schema()
        .iter()
        .filter(|(label, _)| !left.schema().contains(label))
        .collect();
    let extra_values = extra
        .iter()
        .map(|(label, _)| column(right, label))
        .collect::<BackendResult<Vec<_>>>()?;

    let mut schema = left.schema().clone();
    for (label, kind) in &extra {
        schema.insert(*label, *kind);
    }

    let mut output = Frame::empty(schema);
    for (row, key) in column(left, key_col)?.iter().enumerate() {
        if key.is_null() {
            continue;
        }
        let Some(matches) = right_rows.get(&key.key()) else {
            continue;
        };
        for &partner_row in matches {
            let mut values: Vec<Value> = left.row(row).into_iter().cloned().collect();
            values.extend(extra_values.iter().map(|column| column[partner_row].clone()));
            output.push_row(values)?;
        }
    }
    Ok(output)
}

fn pivot(input: &Frame, args: &PivotArgs) -> BackendResult<Frame> {
    let (Some(index_col), Some(pivot_col), Some(value_col)) = (
        args.index_cols.first(),
        args.columns.first(),
        args.value_col.first(),
    ) else {
        return Err(BackendError::Execution(
            "pivot needs an index, a pivot column and a value column".to_string(),
        ));
    };
    let index_values = column(input, index_col)?;
    let pivot_values = column(input, pivot_col)?;
    let values = column(input, value_col)?;

    let mut index_keys: IndexMap<String, Value> = IndexMap::new();
    let mut pivot_keys: IndexMap<String, Value> = IndexMap::new();
    let mut cells: HashMap<(String, String), Vec<&Value>> = HashMap::new();
    for row in 0..input.row_count() {
        let (index, pivot) = (&index_values[row], &pivot_values[row]);
        if index.is_null() || pivot.is_null() {
            continue;
        }
        index_keys.entry(index.key()).or_insert_with(|| index.clone());
        pivot_keys.entry(pivot.key()).or_insert_with(|| pivot.clone());
        cells
            .entry((index.key(), pivot.key()))
            .or_default()
            .push(&values[row]);
    }
    index_keys.sort_by(|_, left, _, right| compare_values(left, right));
    pivot_keys.sort_by(|_, left, _, right| compare_values(left, right));

    let index_kind = input.schema().kind_of(index_col).unwrap_or_default();
    let value_kind = input.schema().kind_of(value_col).unwrap_or_default();
    let mut output = Frame::empty(SchemaMap::new());
    output.push_column(
        index_col.as_str(),
        index_kind,
        index_keys.values().cloned().collect(),
    )?;
    for (pivot_key, pivot_value) in &pivot_keys {
        let column_values = index_keys
            .keys()
            .map(|index_key| match cells.get(&(index_key.clone(), pivot_key.clone())) {
                Some(group) => aggregate(args.agg_func, group),
                None => Ok(Value::Null),
            })
            .collect::<BackendResult<Vec<_>>>()?;
        output.push_column(
            PivotArgs::output_column(value_col, pivot_value),
            value_kind,
            column_values,
        )?;
    }
    Ok(output)
}

fn fill(input: &Frame, args: &FillArgs) -> BackendResult<Frame> {
    let mut output = input.clone();
    let cells = output.column_mut(&args.col_name).ok_or_else(|| {
        BackendError::Execution(format!("missing column '{}'", args.col_name))
    })?;
    for cell in cells.iter_mut() {
        if Comparator::Eq.matches(cell, &args.old_value) {
            *cell = args.new_value.clone();
        }
    }
    Ok(output)
}

fn aggregate(function: AggFunction, cells: &[&Value]) -> BackendResult<Value> {
    let present: Vec<&Value> = cells.iter().copied().filter(|cell| !cell.is_null()).collect();
    match function {
        AggFunction::Count => Ok(Value::Int(present.len() as i64)),
        AggFunction::Min | AggFunction::Max => {
            let wanted = if function == AggFunction::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let best = present.into_iter().reduce(|best, candidate| {
                if candidate.compare(best) == Some(wanted) {
                    candidate
                } else {
                    best
                }
            });
            Ok(best.cloned().unwrap_or(Value::Null))
        }
        AggFunction::Sum | AggFunction::Mean => {
            let numbers = present
                .iter()
                .map(|cell| {
                    cell.as_f64().ok_or_else(|| {
                        BackendError::Execution(format!(
                            "cannot {} non-numeric value {cell}",
                            function.as_str()
                        ))
                    })
                })
                .collect::<BackendResult<Vec<f64>>>()?;
            if function == AggFunction::Mean {
                if numbers.is_empty() {
                    return Ok(Value::Null);
                }
                return Ok(Value::Float(
                    numbers.iter().sum::<f64>() / numbers.len() as f64,
                ));
            }
            let all_ints = present.iter().all(|cell| matches!(cell, Value::Int(_)));
            if all_ints {
                let total = present
                    .iter()
                    .filter_map(|cell| match cell {
                        Value::Int(value) => Some(*value),
                        _ => None,
                    })
                    .try_fold(0i64, i64::checked_add);
                if let Some(total) = total {
                    return Ok(Value::Int(total));
                }
            }
            Ok(Value::Float(numbers.iter().sum()))
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    left.compare(right)
        .unwrap_or_else(|| left.key().cmp(&right.key()))
}

fn compare_keys(left: &[Value], right: &[Value]) -> Ordering {
    left.iter()
        .zip(right)
        .map(|(left, right)| compare_values(left, right))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn render_step(step: &OpStep, partner: Option<&str>) -> String {
    match step {
        OpStep::Sample(args) => format!(".sample(frac={})", args.frac),
        OpStep::Apply(args) => format!(
            ".assign(**{{'{}': lambda df: {} * df['{}'] + {}}})",
            args.output_column(),
            args.a,
            args.numeric_col,
            args.b
        ),
        OpStep::Groupby(args) => format!(
            ".groupby({:?})[{:?}].agg('{}').reset_index()",
            args.group_columns,
            args.agg_columns,
            args.agg_function.as_str()
        ),
        OpStep::Project(args) => format!("[{:?}]", args.output_cols),
        OpStep::Select(args) => format!(
            ".query(\"`{}` {} {}\")",
            args.column,
            args.comparator.as_str(),
            args.value
        ),
        OpStep::Merge(args) => format!(
            ".merge({}, on='{}')",
            partner.unwrap_or("right"),
            args.key_col
        ),
        OpStep::Pivot(args) => format!(
            ".pivot_table(index={:?}, columns={:?}, values={:?}, aggfunc='{}')",
            args.index_cols,
            args.columns,
            args.value_col,
            args.agg_func.as_str()
        ),
        OpStep::Fill(args) => format!(
            ".replace({{'{}': {{{}: {}}}}})",
            args.col_name, args.old_value, args.new_value
        ),
    }
}
