use forkbench_core::{SchemaMap, Value};

use crate::errors::GenerationError;

/// Column-major table whose column order follows its schema map.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    schema: SchemaMap,
    columns: Vec<Vec<Value>>,
    rows: usize,
}

impl Frame {
    /// Build a frame from one value vector per schema column.
    pub fn new(schema: SchemaMap, columns: Vec<Vec<Value>>) -> Result<Self, GenerationError> {
        if columns.len() != schema.len() {
            return Err(GenerationError::Shape(format!(
                "schema has {} columns but {} were supplied",
                schema.len(),
                columns.len()
            )));
        }
        let rows = columns.first().map(Vec::len).unwrap_or(0);
        if let Some((label, column)) = schema
            .labels()
            .zip(&columns)
            .find(|(_, column)| column.len() != rows)
        {
            return Err(GenerationError::Shape(format!(
                "column '{label}' has {} rows, expected {rows}",
                column.len()
            )));
        }
        Ok(Self {
            schema,
            columns,
            rows,
        })
    }

    pub fn empty(schema: SchemaMap) -> Self {
        let columns = vec![Vec::new(); schema.len()];
        Self {
            schema,
            columns,
            rows: 0,
        }
    }

    /// Build a frame from row-major data.
    pub fn from_rows(schema: SchemaMap, rows: Vec<Vec<Value>>) -> Result<Self, GenerationError> {
        let mut frame = Self::empty(schema);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.schema.labels().position(|candidate| candidate == label)
    }

    pub fn column(&self, label: &str) -> Option<&[Value]> {
        self.column_index(label)
            .map(|index| self.columns[index].as_slice())
    }

    pub fn column_mut(&mut self, label: &str) -> Option<&mut Vec<Value>> {
        let index = self.column_index(label)?;
        self.columns.get_mut(index)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.schema
            .labels()
            .zip(self.columns.iter().map(Vec::as_slice))
    }

    /// Values of row `index` in column order.
    pub fn row(&self, index: usize) -> Vec<&Value> {
        self.columns.iter().map(|column| &column[index]).collect()
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), GenerationError> {
        if row.len() != self.columns.len() {
            return Err(GenerationError::Shape(format!(
                "row has {} values, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        self.rows += 1;
        Ok(())
    }

    /// Append a column at the end of the schema.
    pub fn push_column(
        &mut self,
        label: impl Into<String>,
        kind: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<(), GenerationError> {
        let label = label.into();
        if values.len() != self.rows && !(self.columns.is_empty() && self.rows == 0) {
            return Err(GenerationError::Shape(format!(
                "column '{label}' has {} rows, expected {}",
                values.len(),
                self.rows
            )));
        }
        if self.schema.contains(&label) {
            return Err(GenerationError::Shape(format!(
                "column '{label}' already exists"
            )));
        }
        if self.columns.is_empty() {
            self.rows = values.len();
        }
        self.schema.insert(label, kind);
        self.columns.push(values);
        Ok(())
    }

    /// New frame holding the rows at `indices`, in that order.
    pub fn take_rows(&self, indices: &[usize]) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|column| indices.iter().map(|&index| column[index].clone()).collect())
            .collect();
        Frame {
            schema: self.schema.clone(),
            columns,
            rows: indices.len(),
        }
    }

    /// New frame restricted to `labels`, keeping this frame's column order.
    pub fn project<S: AsRef<str>>(&self, labels: &[S]) -> Frame {
        let schema = self.schema.retain_labels(labels);
        let columns = schema
            .labels()
            .filter_map(|label| self.column(label))
            .map(<[Value]>::to_vec)
            .collect();
        Frame {
            schema,
            columns,
            rows: self.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        let schema: SchemaMap = [("a__city", "city"), ("b__random_int", "random_int")]
            .into_iter()
            .collect();
        Frame::new(
            schema,
            vec![
                vec![Value::Text("Porto".into()), Value::Text("Braga".into())],
                vec![Value::Int(1), Value::Int(2)],
            ],
        )
        .expect("frame")
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let schema: SchemaMap = [("a", "city"), ("b", "random_int")].into_iter().collect();
        let result = Frame::new(schema, vec![vec![Value::Null], vec![]]);
        assert!(matches!(result, Err(GenerationError::Shape(_))));
    }

    #[test]
    fn take_rows_and_project() {
        let frame = frame();
        let taken = frame.take_rows(&[1]);
        assert_eq!(taken.row_count(), 1);
        assert_eq!(taken.column("b__random_int"), Some(&[Value::Int(2)][..]));

        let projected = frame.project(&["b__random_int"]);
        assert_eq!(projected.column_count(), 1);
        assert_eq!(projected.row_count(), 2);
    }

    #[test]
    fn push_column_extends_schema() {
        let mut frame = frame();
        frame
            .push_column("c__price", "price", vec![Value::Float(1.5), Value::Float(2.5)])
            .expect("push");
        assert_eq!(frame.schema().kind_of("c__price"), Some("price"));
        assert!(frame.push_column("d", "price", vec![Value::Null]).is_err());
    }
}
