//! Key materialization: evaluate name/expression keys against a batch,
//! cast comparison copies to the common key type, and encode composite
//! keys with the arrow row format so a key is one comparable byte string.
//!
//! One [`KeyEncoder`] is shared by both sides of a join (and by every
//! probe chunk in streaming mode): arrow rows are only comparable when
//! they come from the same converter.

use datafusion::arrow::array::{ArrayRef, RecordBatch};
use datafusion::arrow::compute::{cast_with_options, CastOptions, SortOptions};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::arrow::row::{RowConverter, Rows, SortField};

use crate::error::{type_err, Result};
use crate::join::schema::ResolvedKey;

/// One side's materialized join keys.
pub(crate) struct SideKeys {
    /// Row-format encoding of the coerced key columns.
    pub rows: Rows,
    /// Per row: every key component is non-null. Null keys never match,
    /// so invalid rows bypass the engines entirely.
    pub valid: Vec<bool>,
    /// The coerced key arrays, kept for full-outer key coalescing.
    pub arrays: Vec<ArrayRef>,
}

pub(crate) struct KeyEncoder {
    converter: RowConverter,
    common_types: Vec<DataType>,
}

impl KeyEncoder {
    /// `descending` flips the encoded byte order of every key column, which
    /// lets the merge engine treat descending-flagged inputs as ascending.
    pub(crate) fn try_new(common_types: &[DataType], descending: bool) -> Result<Self> {
        let fields = common_types
            .iter()
            .map(|t| {
                SortField::new_with_options(
                    t.clone(),
                    SortOptions {
                        descending,
                        nulls_first: true,
                    },
                )
            })
            .collect();
        Ok(Self {
            converter: RowConverter::new(fields)?,
            common_types: common_types.to_vec(),
        })
    }

    pub(crate) fn encode(&self, batch: &RecordBatch, keys: &[ResolvedKey]) -> Result<SideKeys> {
        let arrays = keys
            .iter()
            .zip(self.common_types.iter())
            .map(|(key, common)| coerce(evaluate_key(key, batch)?, common))
            .collect::<Result<Vec<_>>>()?;
        let rows = self.converter.convert_columns(&arrays)?;
        let valid = all_valid_mask(&arrays, batch.num_rows());
        Ok(SideKeys {
            rows,
            valid,
            arrays,
        })
    }
}

pub(crate) fn evaluate_key(key: &ResolvedKey, batch: &RecordBatch) -> Result<ArrayRef> {
    match key {
        ResolvedKey::Column(i) => Ok(batch.column(*i).clone()),
        ResolvedKey::Expr(expr) => Ok(expr.evaluate(batch)?.into_array(batch.num_rows())?),
    }
}

/// Casts a comparison copy. `safe: false` so out-of-range values error
/// instead of turning into nulls that would silently never match.
pub(crate) fn coerce(array: ArrayRef, to: &DataType) -> Result<ArrayRef> {
    if array.data_type() == to {
        return Ok(array);
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    Ok(cast_with_options(array.as_ref(), to, &options)?)
}

pub(crate) fn all_valid_mask(arrays: &[ArrayRef], num_rows: usize) -> Vec<bool> {
    (0..num_rows)
        .map(|i| arrays.iter().all(|a| a.is_valid(i)))
        .collect()
}

/// The common comparison type for a key pair. Widths widen, precision
/// never drops, and anything irreconcilable is a `TypeMismatch`.
pub(crate) fn common_key_type(left: &DataType, right: &DataType) -> Result<DataType> {
    use DataType::*;

    if left == right {
        return Ok(left.clone());
    }
    if let (Some((lw, ls)), Some((rw, rs))) = (int_width(left), int_width(right)) {
        return if ls == rs {
            Ok(int_of(lw.max(rw), ls))
        } else {
            // mixed signedness needs a signed type that holds the
            // unsigned side's full range
            let (uw, sw) = if ls { (rw, lw) } else { (lw, rw) };
            let need = u16::from(sw).max(u16::from(uw) * 2);
            if need > 64 {
                type_err!("cannot join {left} keys against {right} keys without overflow")
            } else {
                Ok(int_of(need as u8, true))
            }
        };
    }
    match (left, right) {
        (Float16 | Float32 | Float64, r) if r.is_numeric() => Ok(Float64),
        (l, Float16 | Float32 | Float64) if l.is_numeric() => Ok(Float64),
        (Timestamp(lu, lz), Timestamp(ru, rz)) => {
            if lz == rz {
                Ok(Timestamp(finer(lu, ru), lz.clone()))
            } else {
                type_err!("timestamp keys disagree on time zone: {left} vs {right}")
            }
        }
        (Duration(lu), Duration(ru)) => Ok(Duration(finer(lu, ru))),
        (Date32, Date64) | (Date64, Date32) => Ok(Date64),
        (Time32(_), Time64(_)) | (Time64(_), Time32(_)) | (Time64(_), Time64(_)) => {
            Ok(Time64(TimeUnit::Nanosecond))
        }
        (Utf8, LargeUtf8) | (LargeUtf8, Utf8) => Ok(LargeUtf8),
        _ => type_err!("cannot join keys of type {left} against {right}"),
    }
}

fn int_width(dt: &DataType) -> Option<(u8, bool)> {
    use DataType::*;
    match dt {
        Int8 => Some((8, true)),
        Int16 => Some((16, true)),
        Int32 => Some((32, true)),
        Int64 => Some((64, true)),
        UInt8 => Some((8, false)),
        UInt16 => Some((16, false)),
        UInt32 => Some((32, false)),
        UInt64 => Some((64, false)),
        _ => None,
    }
}

fn int_of(width: u8, signed: bool) -> DataType {
    use DataType::*;
    match (width, signed) {
        (8, true) => Int8,
        (16, true) => Int16,
        (32, true) => Int32,
        (8, false) => UInt8,
        (16, false) => UInt16,
        (32, false) => UInt32,
        (64, false) => UInt64,
        // widths round up to the next real type
        (w, true) if w <= 16 => Int16,
        (w, true) if w <= 32 => Int32,
        (_, true) => Int64,
        (w, false) if w <= 32 => UInt32,
        (_, false) => UInt64,
    }
}

fn finer(a: &TimeUnit, b: &TimeUnit) -> TimeUnit {
    fn rank(u: &TimeUnit) -> u8 {
        match u {
            TimeUnit::Second => 0,
            TimeUnit::Millisecond => 1,
            TimeUnit::Microsecond => 2,
            TimeUnit::Nanosecond => 3,
        }
    }
    if rank(a) >= rank(b) {
        *a
    } else {
        *b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JoinError;
    use datafusion::arrow::array::Int64Array;
    use std::sync::Arc;

    #[test]
    fn equal_types_pass_through() {
        assert_eq!(
            common_key_type(&DataType::Utf8, &DataType::Utf8).unwrap(),
            DataType::Utf8
        );
    }

    #[test]
    fn integer_widths_widen() {
        assert_eq!(
            common_key_type(&DataType::Int16, &DataType::Int64).unwrap(),
            DataType::Int64
        );
        assert_eq!(
            common_key_type(&DataType::UInt8, &DataType::UInt32).unwrap(),
            DataType::UInt32
        );
    }

    #[test]
    fn mixed_signedness_promotes_to_a_wide_signed_type() {
        assert_eq!(
            common_key_type(&DataType::UInt32, &DataType::Int16).unwrap(),
            DataType::Int64
        );
        assert_eq!(
            common_key_type(&DataType::UInt16, &DataType::Int8).unwrap(),
            DataType::Int32
        );
        let err = common_key_type(&DataType::UInt64, &DataType::Int32).unwrap_err();
        assert!(matches!(err, JoinError::TypeMismatch(_)));
    }

    #[test]
    fn floats_promote_to_f64_unless_both_are_f32() {
        assert_eq!(
            common_key_type(&DataType::Float32, &DataType::Float32).unwrap(),
            DataType::Float32
        );
        assert_eq!(
            common_key_type(&DataType::Float32, &DataType::Int64).unwrap(),
            DataType::Float64
        );
        assert_eq!(
            common_key_type(&DataType::Float64, &DataType::Float32).unwrap(),
            DataType::Float64
        );
    }

    #[test]
    fn temporal_keys_take_the_finer_unit() {
        assert_eq!(
            common_key_type(
                &DataType::Timestamp(TimeUnit::Second, None),
                &DataType::Timestamp(TimeUnit::Microsecond, None)
            )
            .unwrap(),
            DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        let err = common_key_type(
            &DataType::Timestamp(TimeUnit::Second, Some("UTC".into())),
            &DataType::Timestamp(TimeUnit::Second, None),
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::TypeMismatch(_)));
    }

    #[test]
    fn strings_promote_to_large_utf8() {
        assert_eq!(
            common_key_type(&DataType::Utf8, &DataType::LargeUtf8).unwrap(),
            DataType::LargeUtf8
        );
    }

    #[test]
    fn validity_mask_requires_every_component() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]));
        let b: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), Some(2), None]));
        assert_eq!(
            all_valid_mask(&[a, b], 3),
            vec![true, false, false]
        );
    }
}
