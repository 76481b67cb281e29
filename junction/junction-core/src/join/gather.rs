//! Turns match indices into an output batch: nullable-index `take` per
//! side, `interleave` for coalesced full-outer key columns.

use datafusion::arrow::array::{
    new_null_array, Array, ArrayRef, RecordBatch, RecordBatchOptions, UInt32Array,
};
use datafusion::arrow::compute::{interleave, take};

use crate::error::{internal_err, Result};
use crate::join::schema::{OutputSource, ResolvedJoin};

/// Matched row-index pairs. A null entry means "no row on this side"
/// (unmatched outer rows). Semi/anti joins carry left indices only.
pub(crate) struct JoinIndices {
    pub left: UInt32Array,
    pub right: Option<UInt32Array>,
}

impl JoinIndices {
    pub(crate) fn len(&self) -> usize {
        self.left.len()
    }
}

/// Gathers output columns. `coerced` holds the coerced key arrays of both
/// sides and is required whenever the layout contains a coalesced column.
pub(crate) fn gather(
    resolved: &ResolvedJoin,
    left: &RecordBatch,
    right: &RecordBatch,
    coerced: Option<(&[ArrayRef], &[ArrayRef])>,
    indices: &JoinIndices,
) -> Result<RecordBatch> {
    let num_rows = indices.len();
    if let Some(right_indices) = &indices.right {
        if right_indices.len() != num_rows {
            return internal_err!("left/right index arrays disagree on length");
        }
        for i in 0..num_rows {
            if indices.left.is_null(i) && right_indices.is_null(i) {
                return internal_err!("match pair {i} has neither a left nor a right row");
            }
        }
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(resolved.columns.len());
    for (source, field) in resolved
        .columns
        .iter()
        .zip(resolved.output_schema.fields())
    {
        let array = match source {
            OutputSource::Left(i) => gather_side(left.column(*i), &indices.left)?,
            OutputSource::Right(i) => match &indices.right {
                Some(right_indices) => gather_side(right.column(*i), right_indices)?,
                None => return internal_err!("right-side column in a left-only gather"),
            },
            OutputSource::Coalesced { key } => {
                let Some((left_keys, right_keys)) = coerced else {
                    return internal_err!("coalesced column without coerced key arrays");
                };
                let Some(right_indices) = &indices.right else {
                    return internal_err!("coalesced column in a left-only gather");
                };
                let mut picks = Vec::with_capacity(num_rows);
                for i in 0..num_rows {
                    if indices.left.is_valid(i) {
                        picks.push((0, indices.left.value(i) as usize));
                    } else {
                        picks.push((1, right_indices.value(i) as usize));
                    }
                }
                interleave(
                    &[left_keys[*key].as_ref(), right_keys[*key].as_ref()],
                    &picks,
                )?
            }
        };
        if array.data_type() != field.data_type() {
            return internal_err!(
                "gathered column '{}' has type {} but the resolved schema says {}",
                field.name(),
                array.data_type(),
                field.data_type()
            );
        }
        columns.push(array);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        resolved.output_schema.clone(),
        columns,
        &options,
    )?)
}

fn gather_side(column: &ArrayRef, indices: &UInt32Array) -> Result<ArrayRef> {
    // a zero-row side can only be referenced by null indices; `take`
    // bounds-checks the slots behind them, so short-circuit
    if column.is_empty() {
        return Ok(new_null_array(column.data_type(), indices.len()));
    }
    Ok(take(column.as_ref(), indices, None)?)
}
