//! Two-pointer sort-merge join over row-encoded keys. Selected only when
//! both inputs carry a sortedness flag on the whole key, and only for
//! inner/left joins; the encoder has already normalized descending inputs
//! so the byte order here is always ascending, nulls first.
//!
//! Must produce the same match multiset as the hash engine, and does:
//! the left side drives in row order and each equal-key run on the right
//! is rescanned per left row.

use datafusion::arrow::array::UInt32Builder;

use crate::error::{internal_err, Result};
use crate::join::gather::JoinIndices;
use crate::join::keys::SideKeys;
use crate::join::JoinKind;

pub(crate) fn merge_join_indices(
    left: &SideKeys,
    right: &SideKeys,
    kind: JoinKind,
) -> Result<JoinIndices> {
    if !matches!(kind, JoinKind::Inner | JoinKind::Left) {
        return internal_err!("{kind} join reached the merge engine");
    }
    let emit_unmatched = kind == JoinKind::Left;
    let num_left = left.rows.num_rows();
    let num_right = right.rows.num_rows();

    let mut left_b = UInt32Builder::new();
    let mut right_b = UInt32Builder::new();

    // start of the current candidate run on the right
    let mut run = 0usize;
    for i in 0..num_left {
        if !left.valid[i] {
            if emit_unmatched {
                left_b.append_value(i as u32);
                right_b.append_null();
            }
            continue;
        }
        let key = left.rows.row(i);
        while run < num_right
            && (!right.valid[run] || right.rows.row(run) < key)
        {
            run += 1;
        }
        let mut j = run;
        let mut matched = false;
        while j < num_right && right.valid[j] && right.rows.row(j) == key {
            left_b.append_value(i as u32);
            right_b.append_value(j as u32);
            matched = true;
            j += 1;
        }
        if !matched && emit_unmatched {
            left_b.append_value(i as u32);
            right_b.append_null();
        }
    }

    Ok(JoinIndices {
        left: left_b.finish(),
        right: Some(right_b.finish()),
    })
}
