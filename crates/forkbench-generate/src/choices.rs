use forkbench_core::{
    AggFunction, ColumnTaxonomy, GROUPABLE, GroupbyArgs, JOINABLE, MergeArgs, NUMERIC, OpKind,
    OpStep, PivotArgs, ProjectArgs, SampleArgs, SchemaCatalog, SchemaMap,
};
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore};
use tracing::debug;

/// Smallest row count for which `sample` is proposed.
pub const MIN_SAMPLE_ROWS: usize = 10;
/// Bounds of a proposed sample fraction.
pub const SAMPLE_FRACTION: (f64, f64) = (0.1, 0.99);

/// Enumerates the operations that are legal on an artifact, with their
/// arguments already drawn.
#[derive(Debug, Clone, Copy)]
pub struct OperationChoiceGenerator<'a> {
    catalog: SchemaCatalog<'a>,
}

impl<'a> OperationChoiceGenerator<'a> {
    pub fn new(taxonomy: &'a ColumnTaxonomy) -> Self {
        Self {
            catalog: SchemaCatalog::new(taxonomy),
        }
    }

    /// Propose candidate steps for an artifact with `schema` and `row_count`
    /// rows. Candidates whose kind is in `excluded` are dropped after all
    /// arguments have been drawn, so the random stream does not depend on the
    /// exclusion list.
    pub fn propose(
        &self,
        schema: &SchemaMap,
        row_count: usize,
        excluded: &[OpKind],
        rng: &mut dyn RngCore,
    ) -> Vec<OpStep> {
        let classes = self.catalog.classify(schema);
        let mut choices = Vec::new();

        let numeric = classes.columns(NUMERIC);
        let groupable = classes.columns(GROUPABLE);
        if let Some(numeric_col) = numeric.choose(rng).cloned() {
            if !groupable.is_empty() {
                let num_groups = rng.random_range(1..=2usize).min(groupable.len());
                let group_columns = pick_distinct(groupable, num_groups, rng);
                // A column that is both numeric and groupable is either a key
                // or an aggregate, never both.
                let agg_columns: Vec<String> = numeric
                    .iter()
                    .filter(|column| !group_columns.contains(column))
                    .cloned()
                    .collect();
                if !agg_columns.is_empty() {
                    choices.push(OpStep::Groupby(GroupbyArgs {
                        group_columns,
                        agg_columns,
                        agg_function: random_aggregate(rng),
                    }));
                }

                let pivot_keys: Vec<String> = groupable
                    .iter()
                    .filter(|column| **column != numeric_col)
                    .cloned()
                    .collect();
                if pivot_keys.len() >= 2 {
                    let picked = pick_distinct(&pivot_keys, 2, rng);
                    choices.push(OpStep::Pivot(PivotArgs {
                        index_cols: vec![picked[0].clone()],
                        columns: vec![picked[1].clone()],
                        value_col: vec![numeric_col],
                        agg_func: random_aggregate(rng),
                    }));
                }
            }
        }

        if let Some(key_col) = classes.columns(JOINABLE).choose(rng) {
            choices.push(OpStep::Merge(MergeArgs {
                key_col: key_col.clone(),
            }));
        }

        if row_count >= MIN_SAMPLE_ROWS {
            let (low, high) = SAMPLE_FRACTION;
            let frac = low + (high - low) * rng.random::<f64>();
            choices.push(OpStep::Sample(SampleArgs {
                frac: (frac * 100.0).round() / 100.0,
            }));
        }

        if schema.len() > 2 {
            let labels: Vec<String> = schema.labels().map(str::to_string).collect();
            let keep = rng.random_range(1..labels.len());
            choices.push(OpStep::Project(ProjectArgs {
                output_cols: pick_distinct(&labels, keep, rng),
            }));
        }

        choices.retain(|step| !excluded.contains(&step.kind()));
        debug!(
            columns = schema.len(),
            rows = row_count,
            candidates = choices.len(),
            "proposed operations"
        );
        choices
    }
}

fn random_aggregate(rng: &mut dyn RngCore) -> AggFunction {
    AggFunction::ALL[rng.random_range(0..AggFunction::ALL.len())]
}

/// `amount` distinct entries of `pool`, in draw order.
fn pick_distinct(pool: &[String], amount: usize, rng: &mut dyn RngCore) -> Vec<String> {
    rand::seq::index::sample(rng, pool.len(), amount.min(pool.len()))
        .into_iter()
        .map(|index| pool[index].clone())
        .collect()
}
