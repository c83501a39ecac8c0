use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use forkbench_core::{AggFunction, Comparator, OpKind, OpStep, SchemaMap, Value, plan_chain};
use forkbench_generate::{Frame, read_frame_csv, write_frame_csv};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::debug;

use super::{Backend, Execution, require_numeric};
use crate::errors::{BackendError, BackendResult};

/// Backend storing every artifact as a table of one SQLite database file.
///
/// The pool is driven by a private current-thread runtime so the
/// [`Backend`] calls stay synchronous. Pivot is not expressible and is
/// reported as unsupported.
pub struct SqliteBackend {
    runtime: Runtime,
    pool: SqlitePool,
    schemas: HashMap<String, SchemaMap>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> BackendResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = runtime.block_on(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options),
        )?;
        debug!(path = %path.display(), "opened sqlite backend");
        Ok(Self {
            runtime,
            pool,
            schemas: HashMap::new(),
        })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn schema(&self, label: &str) -> BackendResult<&SchemaMap> {
        self.schemas
            .get(label)
            .ok_or_else(|| BackendError::MissingArtifact(label.to_string()))
    }

    fn count(&self, relation: &str) -> BackendResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {relation}");
        let count: i64 = self.block_on(sqlx::query_scalar(&sql).fetch_one(&self.pool))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Render one step as a SELECT over `relation`.
    fn step_sql(
        &self,
        relation: &str,
        input: &SchemaMap,
        output: &SchemaMap,
        step: &OpStep,
        partner: Option<&str>,
    ) -> BackendResult<String> {
        let sql = match step {
            OpStep::Sample(args) => {
                let rows = self.count(relation)?;
                let limit = ((rows as f64) * args.frac).ceil() as usize;
                format!("SELECT * FROM {relation} ORDER BY RANDOM() LIMIT {limit}")
            }
            OpStep::Apply(args) => {
                require_numeric(input, &args.numeric_col)?;
                format!(
                    "SELECT *, ({:?} * {} + {:?}) AS {} FROM {relation}",
                    args.a,
                    quote(&args.numeric_col),
                    args.b,
                    quote(&args.output_column())
                )
            }
            OpStep::Groupby(args) => {
                let function = aggregate_sql(args.agg_function);
                let columns: Vec<String> = output
                    .labels()
                    .map(|label| {
                        if args.group_columns.iter().any(|group| group == label) {
                            quote(label)
                        } else {
                            format!("{function}({}) AS {}", quote(label), quote(label))
                        }
                    })
                    .collect();
                let groups: Vec<String> = args.group_columns.iter().map(|c| quote(c)).collect();
                let not_null: Vec<String> = groups
                    .iter()
                    .map(|group| format!("{group} IS NOT NULL"))
                    .collect();
                format!(
                    "SELECT {} FROM {relation} WHERE {} GROUP BY {} ORDER BY {}",
                    columns.join(", "),
                    not_null.join(" AND "),
                    groups.join(", "),
                    groups.join(", ")
                )
            }
            OpStep::Project(_) => format!("SELECT {} FROM {relation}", column_list(output)),
            OpStep::Select(args) => format!(
                "SELECT * FROM {relation} WHERE {}",
                condition(&args.column, args.comparator, &args.value)
            ),
            OpStep::Merge(args) => {
                let partner = partner.ok_or_else(|| {
                    BackendError::Execution("merge needs a second source".to_string())
                })?;
                let mut columns = vec!["l.*".to_string()];
                columns.extend(
                    output
                        .labels()
                        .filter(|label| !input.contains(label))
                        .map(|label| format!("r.{}", quote(label))),
                );
                let key = quote(&args.key_col);
                format!(
                    "SELECT {} FROM {relation} AS l INNER JOIN {} AS r ON l.{key} = r.{key}",
                    columns.join(", "),
                    quote(partner)
                )
            }
            OpStep::Pivot(_) => {
                return Err(BackendError::Unsupported {
                    backend: "sqlite",
                    op: OpKind::Pivot,
                });
            }
            OpStep::Fill(args) => {
                let columns: Vec<String> = input
                    .labels()
                    .map(|label| {
                        if label == args.col_name {
                            format!(
                                "CASE WHEN {} THEN {} ELSE {} END AS {}",
                                condition(label, Comparator::Eq, &args.old_value),
                                literal(&args.new_value),
                                quote(label),
                                quote(label)
                            )
                        } else {
                            quote(label)
                        }
                    })
                    .collect();
                format!("SELECT {} FROM {relation}", columns.join(", "))
            }
        };
        Ok(sql)
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        self.runtime.block_on(self.pool.close());
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports(&self, kind: OpKind) -> bool {
        kind != OpKind::Pivot
    }

    fn materialize_base(&mut self, label: &str, frame: Frame) -> BackendResult<()> {
        if frame.column_count() == 0 {
            return Err(BackendError::Execution(format!(
                "cannot create table '{label}' without columns"
            )));
        }
        let table = quote(label);
        let columns = column_list(frame.schema());
        let placeholders = vec!["?"; frame.column_count()].join(", ");
        let drop = format!("DROP TABLE IF EXISTS {table}");
        let create = format!("CREATE TABLE {table} ({columns})");
        let insert = format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})");

        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&drop).execute(&mut *tx).await?;
            sqlx::query(&create).execute(&mut *tx).await?;
            for index in 0..frame.row_count() {
                let query = frame
                    .row(index)
                    .into_iter()
                    .fold(sqlx::query(&insert), bind_value);
                query.execute(&mut *tx).await?;
            }
            tx.commit().await
        })?;

        debug!(
            label,
            rows = frame.row_count(),
            columns = frame.column_count(),
            "created sqlite table"
        );
        self.schemas.insert(label.to_string(), frame.schema().clone());
        Ok(())
    }

    fn execute(
        &mut self,
        sources: &[&str],
        chain: &[OpStep],
        new_label: &str,
    ) -> BackendResult<Execution> {
        if let Some(step) = chain.iter().find(|step| !self.supports(step.kind())) {
            return Err(BackendError::Unsupported {
                backend: "sqlite",
                op: step.kind(),
            });
        }
        let schemas = sources
            .iter()
            .map(|label| self.schema(label))
            .collect::<BackendResult<Vec<_>>>()?;
        let planned = plan_chain(chain, &schemas)?.ok_or_else(|| {
            BackendError::Execution("chain has no static output schema".to_string())
        })?;

        let mut relation = quote(sources[0]);
        let mut current = schemas[0].clone();
        let mut select = String::new();
        for (position, step) in chain.iter().enumerate() {
            let partner = if position == 0 {
                sources.get(1).copied()
            } else {
                None
            };
            let partner_schema = if position == 0 { schemas.get(1).copied() } else { None };
            let output = step
                .plan_schema(&current, partner_schema)?
                .ok_or_else(|| BackendError::Execution("step has no static schema".to_string()))?;
            select = self.step_sql(&relation, &current, &output, step, partner)?;
            relation = format!("({select})");
            current = output;
        }

        let table = quote(new_label);
        let drop = format!("DROP TABLE IF EXISTS {table}");
        let create = format!("CREATE TABLE {table} AS {select}");
        self.block_on(async {
            sqlx::query(&drop).execute(&self.pool).await?;
            sqlx::query(&create).execute(&self.pool).await
        })?;

        let row_count = self.count(&table)?;
        debug!(label = new_label, rows = row_count, sql = %create, "materialized sqlite table");
        self.schemas.insert(new_label.to_string(), planned.clone());
        Ok(Execution {
            schema: planned,
            row_count,
            code: create,
        })
    }

    fn row_count(&self, label: &str) -> BackendResult<usize> {
        self.schema(label)?;
        self.count(&quote(label))
    }

    fn schema_of(&self, label: &str) -> BackendResult<SchemaMap> {
        self.schema(label).cloned()
    }

    fn frame(&self, label: &str) -> BackendResult<Frame> {
        let schema = self.schema(label)?.clone();
        let sql = format!("SELECT * FROM {}", quote(label));
        let rows: Vec<SqliteRow> = self.block_on(sqlx::query(&sql).fetch_all(&self.pool))?;
        let values = rows
            .iter()
            .map(|row| (0..row.len()).map(|index| read_value(row, index)).collect())
            .collect::<Result<Vec<Vec<Value>>, sqlx::Error>>()?;
        Ok(Frame::from_rows(schema, values)?)
    }

    fn serialize(&self, label: &str, path: &Path) -> BackendResult<()> {
        write_frame_csv(path, &self.frame(label)?)?;
        Ok(())
    }

    fn deserialize(&mut self, label: &str, path: &Path, schema: &SchemaMap) -> BackendResult<()> {
        let frame = read_frame_csv(path, schema)?;
        self.materialize_base(label, frame)
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_list(schema: &SchemaMap) -> String {
    schema.labels().map(quote).collect::<Vec<_>>().join(", ")
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => format!("{value:?}"),
        Value::Text(value) => format!("'{}'", value.replace('\'', "''")),
    }
}

fn condition(column: &str, comparator: Comparator, value: &Value) -> String {
    let column = quote(column);
    if value.is_null() {
        return match comparator {
            Comparator::Eq => format!("{column} IS NULL"),
            Comparator::Ne => format!("{column} IS NOT NULL"),
            _ => "0".to_string(),
        };
    }
    let operator = match comparator {
        Comparator::Eq => "=",
        Comparator::Ne => "<>",
        other => other.as_str(),
    };
    format!("{column} {operator} {}", literal(value))
}

fn aggregate_sql(function: AggFunction) -> &'static str {
    match function {
        AggFunction::Min => "MIN",
        AggFunction::Max => "MAX",
        AggFunction::Sum => "SUM",
        AggFunction::Mean => "AVG",
        AggFunction::Count => "COUNT",
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Int(value) => query.bind(*value),
        Value::Float(value) => query.bind(*value),
        Value::Text(value) => query.bind(value.clone()),
    }
}

fn read_value(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Ok(Value::Int(row.try_get_unchecked::<i64, _>(index)?)),
        "REAL" | "NUMERIC" => Ok(Value::Float(row.try_get_unchecked::<f64, _>(index)?)),
        _ => Ok(Value::Text(row.try_get_unchecked::<String, _>(index)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkbench_core::{GroupbyArgs, MergeArgs, PivotArgs, SelectArgs};
    use std::path::PathBuf;

    fn temp_db(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "forkbench_sqlite_{label}_{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir.join("wf.db")
    }

    fn text(value: &str) -> Value {
        Value::Text(value.to_string())
    }

    fn backend(label: &str) -> SqliteBackend {
        let mut backend = SqliteBackend::open(&temp_db(label)).expect("open");
        let schema: SchemaMap = [
            ("c__city", "city"),
            ("k__uuid4", "uuid4"),
            ("v__random_int", "random_int"),
        ]
        .into_iter()
        .collect();
        let frame = Frame::from_rows(
            schema,
            vec![
                vec![text("Porto"), text("k1"), Value::Int(10)],
                vec![text("Braga"), text("k2"), Value::Null],
                vec![text("Porto"), text("k3"), Value::Int(6)],
            ],
        )
        .expect("frame");
        backend.materialize_base("artifact_0", frame).expect("base");
        backend
    }

    #[test]
    fn base_table_round_trips_values() {
        let backend = backend("round_trip");
        let frame = backend.frame("artifact_0").expect("frame");
        assert_eq!(frame.row_count(), 3);
        assert_eq!(
            frame.column("v__random_int").expect("values"),
            &[Value::Int(10), Value::Null, Value::Int(6)][..]
        );
    }

    #[test]
    fn groupby_runs_as_sql() {
        let mut backend = backend("groupby");
        let step = OpStep::Groupby(GroupbyArgs {
            group_columns: vec!["c__city".to_string()],
            agg_columns: vec!["v__random_int".to_string()],
            agg_function: AggFunction::Max,
        });
        let execution = backend
            .execute(&["artifact_0"], &[step], "artifact_1")
            .expect("groupby");
        assert_eq!(execution.row_count, 2);
        assert!(execution.code.starts_with("CREATE TABLE \"artifact_1\" AS SELECT"));
        let frame = backend.frame("artifact_1").expect("frame");
        assert_eq!(
            frame.column("v__random_int").expect("max"),
            &[Value::Null, Value::Int(10)][..]
        );
    }

    #[test]
    fn select_with_null_literal_uses_is_null() {
        let mut backend = backend("select_null");
        let step = OpStep::Select(SelectArgs {
            column: "v__random_int".to_string(),
            comparator: Comparator::Eq,
            value: Value::Null,
        });
        let execution = backend
            .execute(&["artifact_0"], &[step], "artifact_1")
            .expect("select");
        assert_eq!(execution.row_count, 1);
        assert!(execution.code.contains("IS NULL"));
    }

    #[test]
    fn merge_joins_partner_columns() {
        let mut backend = backend("merge");
        let partner_schema: SchemaMap = [("k__uuid4", "uuid4"), ("n__name", "name")]
            .into_iter()
            .collect();
        let partner = Frame::from_rows(partner_schema, vec![vec![text("k3"), text("Rui")]])
            .expect("partner");
        backend.materialize_base("artifact_1", partner).expect("partner");
        let step = OpStep::Merge(MergeArgs {
            key_col: "k__uuid4".to_string(),
        });
        let execution = backend
            .execute(&["artifact_0", "artifact_1"], &[step], "artifact_2")
            .expect("merge");
        assert_eq!(execution.row_count, 1);
        let frame = backend.frame("artifact_2").expect("frame");
        assert_eq!(frame.column("n__name").expect("names"), &[text("Rui")][..]);
    }

    #[test]
    fn pivot_is_unsupported() {
        let mut backend = backend("pivot");
        assert!(!backend.supports(OpKind::Pivot));
        let step = OpStep::Pivot(PivotArgs {
            index_cols: vec!["c__city".to_string()],
            columns: vec!["k__uuid4".to_string()],
            value_col: vec!["v__random_int".to_string()],
            agg_func: AggFunction::Sum,
        });
        assert!(matches!(
            backend.execute(&["artifact_0"], &[step], "artifact_1"),
            Err(BackendError::Unsupported {
                op: OpKind::Pivot,
                ..
            })
        ));
    }
}
