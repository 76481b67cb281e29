//! [`Table`]: a schema, a sequence of record batches, and per-column
//! sortedness metadata. The flags are advisory: they are never verified
//! against the data, they only unlock the sort-merge strategy and are
//! recomputed for join outputs.

use std::collections::HashSet;

use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::SchemaRef;

use crate::error::{config_err, Result};

/// Advisory per-column ordering flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sortedness {
    Ascending,
    Descending,
    #[default]
    Unordered,
}

impl Sortedness {
    pub fn is_sorted(&self) -> bool {
        !matches!(self, Sortedness::Unordered)
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    sortedness: Vec<Sortedness>,
}

impl Table {
    /// Builds a table from batches that all share `schema`. Column names
    /// must be unique; joins rename on output, inputs have to start clean.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(schema.fields().len());
        for field in schema.fields() {
            if !seen.insert(field.name().as_str()) {
                return config_err!("duplicate column name '{}' in table schema", field.name());
            }
        }
        for batch in &batches {
            if batch.schema().fields() != schema.fields() {
                return config_err!(
                    "batch schema {} does not match table schema {}",
                    batch.schema(),
                    schema
                );
            }
        }
        let sortedness = vec![Sortedness::Unordered; schema.fields().len()];
        Ok(Self {
            schema,
            batches,
            sortedness,
        })
    }

    pub fn try_from_batch(batch: RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        Self::try_new(schema, vec![batch])
    }

    pub(crate) fn from_parts(
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        sortedness: Vec<Sortedness>,
    ) -> Self {
        Self {
            schema,
            batches,
            sortedness,
        }
    }

    /// Flags `column` as sorted. The claim is trusted, not checked.
    pub fn with_sorted(mut self, column: &str, order: Sortedness) -> Result<Self> {
        match self.schema.index_of(column) {
            Ok(idx) => {
                self.sortedness[idx] = order;
                Ok(self)
            }
            Err(_) => config_err!("cannot flag unknown column '{column}' as sorted"),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn sortedness(&self) -> &[Sortedness] {
        &self.sortedness
    }

    pub fn sortedness_of(&self, column: &str) -> Option<Sortedness> {
        let idx = self.schema.index_of(column).ok()?;
        Some(self.sortedness[idx])
    }

    /// Concatenates the chunks into a single batch.
    pub fn to_batch(&self) -> Result<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JoinError;
    use datafusion::arrow::array::{ArrayRef, Int32Array};
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        RecordBatch::try_from_iter(vec![(
            "a",
            Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef,
        )])
        .unwrap()
    }

    #[test]
    fn flags_default_to_unordered() {
        let t = Table::try_from_batch(batch()).unwrap();
        assert_eq!(t.sortedness_of("a"), Some(Sortedness::Unordered));
        assert_eq!(t.sortedness_of("missing"), None);
    }

    #[test]
    fn with_sorted_sets_the_flag() {
        let t = Table::try_from_batch(batch())
            .unwrap()
            .with_sorted("a", Sortedness::Ascending)
            .unwrap();
        assert_eq!(t.sortedness_of("a"), Some(Sortedness::Ascending));
        assert!(t.sortedness_of("a").unwrap().is_sorted());
    }

    #[test]
    fn with_sorted_rejects_unknown_column() {
        let err = Table::try_from_batch(batch())
            .unwrap()
            .with_sorted("b", Sortedness::Ascending)
            .unwrap_err();
        assert!(matches!(err, JoinError::Configuration(_)));
    }
}
