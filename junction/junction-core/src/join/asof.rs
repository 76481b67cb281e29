//! Ordered as-of join: for every left row, the closest right-side key at
//! or before it (backward), at or after it (forward), or whichever is
//! nearer (nearest, ties break backward), optionally within an inclusive
//! tolerance window and optionally within an equality "by" partition.
//!
//! The right side is organized as a directory keyed by the encoded
//! by-columns; each partition's `(key, row)` pairs are sorted once and
//! every left row answers with a binary search. Left rows appear in the
//! output exactly once, in input order.

use datafusion::arrow::array::{
    Array, ArrayRef, Float64Array, Int64Array, RecordBatch, UInt32Builder,
};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::common::ScalarValue;
use fnv::FnvHashMap;

use crate::error::{config_err, internal_err, Result};
use crate::join::gather::JoinIndices;
use crate::join::keys::{coerce, evaluate_key, KeyEncoder};
use crate::join::schema::{ResolvedJoin, ResolvedKey};
use crate::join::{AsofDirection, AsofOptions};

/// An ordering-key value an as-of comparison understands: a total-enough
/// order plus a distance to compare against the tolerance.
trait AsofKey: Copy + PartialOrd {
    type Dist: Copy + PartialOrd;
    fn dist(a: Self, b: Self) -> Self::Dist;
}

impl AsofKey for i64 {
    // i128 so the distance between extremes cannot wrap
    type Dist = i128;
    fn dist(a: Self, b: Self) -> i128 {
        (a as i128 - b as i128).abs()
    }
}

impl AsofKey for f64 {
    type Dist = f64;
    fn dist(a: Self, b: Self) -> f64 {
        (a - b).abs()
    }
}

enum KeyView {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
}

pub(crate) fn asof_join_indices(
    left: &RecordBatch,
    right: &RecordBatch,
    resolved: &ResolvedJoin,
    options: &AsofOptions,
) -> Result<JoinIndices> {
    let key_type = &resolved.common_types[0];
    let left_view = numeric_view(&resolved.left_keys[0], left, key_type)?;
    let right_view = numeric_view(&resolved.right_keys[0], right, key_type)?;

    // encode the by-columns of both sides with one shared converter
    let by = if resolved.left_by.is_empty() {
        None
    } else {
        let encoder = KeyEncoder::try_new(&resolved.by_types, false)?;
        let left_keys: Vec<ResolvedKey> =
            resolved.left_by.iter().map(|&i| ResolvedKey::Column(i)).collect();
        let right_keys: Vec<ResolvedKey> =
            resolved.right_by.iter().map(|&i| ResolvedKey::Column(i)).collect();
        Some((
            encoder.encode(left, &left_keys)?,
            encoder.encode(right, &right_keys)?,
        ))
    };

    let matches = match (&left_view, &right_view) {
        (KeyView::Int(_), KeyView::Float(_)) | (KeyView::Float(_), KeyView::Int(_)) => {
            return internal_err!("as-of key views disagree after coercion");
        }
        (KeyView::Int(l), KeyView::Int(r)) => {
            let tolerance = int_tolerance(options.tolerance.as_ref(), key_type)?;
            match_all(l, r, by.as_ref(), options.direction, tolerance)
        }
        (KeyView::Float(l), KeyView::Float(r)) => {
            let tolerance = float_tolerance(options.tolerance.as_ref())?;
            match_all(l, r, by.as_ref(), options.direction, tolerance)
        }
    };

    let mut left_b = UInt32Builder::with_capacity(matches.len());
    let mut right_b = UInt32Builder::with_capacity(matches.len());
    for (i, m) in matches.iter().enumerate() {
        left_b.append_value(i as u32);
        right_b.append_option(*m);
    }
    Ok(JoinIndices {
        left: left_b.finish(),
        right: Some(right_b.finish()),
    })
}

/// Evaluates the ordering key and views it as i64 (integers, temporal
/// types) or f64 (floats); anything else cannot be ordered for as-of.
fn numeric_view(key: &ResolvedKey, batch: &RecordBatch, common: &DataType) -> Result<KeyView> {
    let array = coerce(evaluate_key(key, batch)?, common)?;
    if matches!(common, DataType::Float16 | DataType::Float32 | DataType::Float64) {
        let values = coerce(array, &DataType::Float64)?;
        let values = downcast::<Float64Array>(&values)?;
        Ok(KeyView::Float(values.iter().collect()))
    } else if is_int_viewable(common) {
        let values = coerce(array, &DataType::Int64)?;
        let values = downcast::<Int64Array>(&values)?;
        Ok(KeyView::Int(values.iter().collect()))
    } else {
        config_err!("as-of ordering keys must be numeric or temporal, got {common}")
    }
}

fn is_int_viewable(dt: &DataType) -> bool {
    use DataType::*;
    matches!(
        dt,
        Int8 | Int16
            | Int32
            | Int64
            | UInt8
            | UInt16
            | UInt32
            | UInt64
            | Timestamp(_, _)
            | Date32
            | Date64
            | Time32(_)
            | Time64(_)
            | Duration(_)
    )
}

fn downcast<'a, T: Array + 'static>(array: &'a ArrayRef) -> Result<&'a T> {
    match array.as_any().downcast_ref::<T>() {
        Some(typed) => Ok(typed),
        None => internal_err!("as-of key view cast produced an unexpected array type"),
    }
}

/// Tolerance for an integer-viewed key. Temporal keys take the tolerance
/// as a duration in their own time unit, so a coarser-unit scalar scales
/// instead of being reinterpreted as a raw count; unit-less integer keys
/// read a raw magnitude.
fn int_tolerance(tolerance: Option<&ScalarValue>, key_type: &DataType) -> Result<Option<i128>> {
    let Some(scalar) = tolerance else { return Ok(None) };
    let target = match key_time_unit(key_type) {
        Some(unit) => DataType::Duration(unit),
        None => DataType::Int64,
    };
    let cast = scalar
        .cast_to(&target)
        .map_err(|_| tolerance_error(scalar))?;
    let magnitude = match cast {
        ScalarValue::Int64(Some(v))
        | ScalarValue::DurationSecond(Some(v))
        | ScalarValue::DurationMillisecond(Some(v))
        | ScalarValue::DurationMicrosecond(Some(v))
        | ScalarValue::DurationNanosecond(Some(v)) => v,
        _ => return Err(tolerance_error(scalar)),
    };
    if magnitude >= 0 {
        Ok(Some(i128::from(magnitude)))
    } else {
        Err(tolerance_error(scalar))
    }
}

fn key_time_unit(key_type: &DataType) -> Option<TimeUnit> {
    match key_type {
        DataType::Timestamp(unit, _)
        | DataType::Duration(unit)
        | DataType::Time32(unit)
        | DataType::Time64(unit) => Some(*unit),
        // Date64 is milliseconds since the epoch
        DataType::Date64 => Some(TimeUnit::Millisecond),
        _ => None,
    }
}

fn float_tolerance(tolerance: Option<&ScalarValue>) -> Result<Option<f64>> {
    let Some(scalar) = tolerance else { return Ok(None) };
    let cast = scalar
        .cast_to(&DataType::Float64)
        .map_err(|_| tolerance_error(scalar))?;
    match cast {
        ScalarValue::Float64(Some(v)) if v >= 0.0 => Ok(Some(v)),
        _ => Err(tolerance_error(scalar)),
    }
}

fn tolerance_error(scalar: &ScalarValue) -> crate::error::JoinError {
    crate::error::JoinError::Configuration(format!(
        "as-of tolerance must be a non-negative scalar compatible with the key type, got {scalar}"
    ))
}

fn match_all<T: AsofKey>(
    left: &[Option<T>],
    right: &[Option<T>],
    by: Option<&(crate::join::keys::SideKeys, crate::join::keys::SideKeys)>,
    direction: AsofDirection,
    tolerance: Option<T::Dist>,
) -> Vec<Option<u32>> {
    match by {
        None => {
            let mut run: Vec<(T, u32)> = right
                .iter()
                .enumerate()
                .filter_map(|(j, v)| v.map(|v| (v, j as u32)))
                .collect();
            sort_run(&mut run);
            left.iter()
                .map(|key| key.and_then(|k| find_match(&run, k, direction, tolerance)))
                .collect()
        }
        Some((left_by, right_by)) => {
            let mut directory: FnvHashMap<Vec<u8>, Vec<(T, u32)>> = FnvHashMap::default();
            for (j, value) in right.iter().enumerate() {
                if let Some(v) = value {
                    if right_by.valid[j] {
                        directory
                            .entry(right_by.rows.row(j).data().to_vec())
                            .or_default()
                            .push((*v, j as u32));
                    }
                }
            }
            for run in directory.values_mut() {
                sort_run(run);
            }
            left.iter()
                .enumerate()
                .map(|(i, key)| {
                    let k = (*key)?;
                    if !left_by.valid[i] {
                        return None;
                    }
                    let run = directory.get(left_by.rows.row(i).data())?;
                    find_match(run, k, direction, tolerance)
                })
                .collect()
        }
    }
}

fn sort_run<T: AsofKey>(run: &mut [(T, u32)]) {
    run.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
}

/// Binary search in a sorted `(key, row)` run. Backward picks the last
/// entry `<= key`, forward the first `>= key`; the tolerance boundary is
/// inclusive on both.
fn find_match<T: AsofKey>(
    run: &[(T, u32)],
    key: T,
    direction: AsofDirection,
    tolerance: Option<T::Dist>,
) -> Option<u32> {
    let in_window = |candidate: Option<(T, u32)>| {
        candidate.and_then(|(v, row)| match tolerance {
            Some(t) if T::dist(v, key) > t => None,
            _ => Some((v, row)),
        })
    };
    let backward = || {
        let p = run.partition_point(|(v, _)| *v <= key);
        in_window(p.checked_sub(1).map(|i| run[i]))
    };
    let forward = || {
        let p = run.partition_point(|(v, _)| *v < key);
        in_window(run.get(p).copied())
    };
    match direction {
        AsofDirection::Backward => backward().map(|(_, row)| row),
        AsofDirection::Forward => forward().map(|(_, row)| row),
        AsofDirection::Nearest => match (backward(), forward()) {
            (Some((bv, br)), Some((fv, fr))) => {
                if T::dist(bv, key) <= T::dist(fv, key) {
                    Some(br)
                } else {
                    Some(fr)
                }
            }
            (Some((_, br)), None) => Some(br),
            (None, Some((_, fr))) => Some(fr),
            (None, None) => None,
        },
    }
}
