//! Build/probe hash join over row-encoded keys. The right side is indexed
//! once; the left side probes in row order, which is what keeps the
//! output left-ordered for the order-preserving kinds. Cross products
//! live here too since they share the index-emission machinery.

use ahash::RandomState;
use datafusion::arrow::array::UInt32Builder;
use datafusion::arrow::row::Rows;
use hashbrown::HashMap;

use crate::error::{internal_err, Result};
use crate::join::gather::JoinIndices;
use crate::join::keys::SideKeys;
use crate::join::JoinKind;

/// Hash index over the build (right) side: encoded key bytes to the row
/// numbers carrying that key, in row order. Rows with null key components
/// are never inserted, so they can never match.
pub(crate) struct JoinHashIndex {
    map: HashMap<Vec<u8>, Vec<u32>, RandomState>,
    /// Per build row: has any probe row matched it yet. Only full joins
    /// read this, everyone pays one bit per row.
    matched: Vec<bool>,
}

impl JoinHashIndex {
    pub(crate) fn build(rows: &Rows, valid: &[bool]) -> Self {
        let mut map = HashMap::with_capacity_and_hasher(
            rows.num_rows(),
            RandomState::with_seeds(0, 0, 0, 0),
        );
        for i in 0..rows.num_rows() {
            if valid[i] {
                map.entry_ref(rows.row(i).data())
                    .or_insert_with(Vec::new)
                    .push(i as u32);
            }
        }
        Self {
            map,
            matched: vec![false; rows.num_rows()],
        }
    }

}

/// Probes one left chunk against the index, appending match indices.
/// Left rows are visited in order; duplicate build keys fan out into one
/// output row per match.
pub(crate) fn probe_into(
    index: &mut JoinHashIndex,
    probe: &SideKeys,
    kind: JoinKind,
    left: &mut UInt32Builder,
    right: &mut UInt32Builder,
) -> Result<()> {
    // split borrows: the map is read while the matched bits are written
    let JoinHashIndex { map, matched } = index;
    match kind {
        JoinKind::Inner | JoinKind::Left | JoinKind::Full => {
            for i in 0..probe.rows.num_rows() {
                let matches = if probe.valid[i] {
                    map.get(probe.rows.row(i).data())
                } else {
                    None
                };
                match matches {
                    Some(js) => {
                        for &j in js {
                            left.append_value(i as u32);
                            right.append_value(j);
                            if kind == JoinKind::Full {
                                matched[j as usize] = true;
                            }
                        }
                    }
                    None if kind != JoinKind::Inner => {
                        left.append_value(i as u32);
                        right.append_null();
                    }
                    None => {}
                }
            }
            Ok(())
        }
        JoinKind::Semi | JoinKind::Anti => {
            for i in 0..probe.rows.num_rows() {
                let has_match = probe.valid[i] && map.contains_key(probe.rows.row(i).data());
                if has_match == (kind == JoinKind::Semi) {
                    left.append_value(i as u32);
                }
            }
            Ok(())
        }
        JoinKind::Cross | JoinKind::Asof => {
            internal_err!("{kind} join reached the hash probe")
        }
    }
}

/// Appends `(null, j)` for every build row no probe row has touched,
/// including null-key build rows. The trailing phase of a full join.
pub(crate) fn append_unmatched_right(
    index: &JoinHashIndex,
    left: &mut UInt32Builder,
    right: &mut UInt32Builder,
) {
    for (j, seen) in index.matched.iter().enumerate() {
        if !seen {
            left.append_null();
            right.append_value(j as u32);
        }
    }
}

/// Single-shot hash join: index the right side, probe the whole left side.
pub(crate) fn hash_join_indices(
    left: &SideKeys,
    right: &SideKeys,
    kind: JoinKind,
) -> Result<JoinIndices> {
    let mut index = JoinHashIndex::build(&right.rows, &right.valid);
    let mut left_b = UInt32Builder::new();
    let mut right_b = UInt32Builder::new();
    probe_into(&mut index, left, kind, &mut left_b, &mut right_b)?;
    if kind == JoinKind::Full {
        append_unmatched_right(&index, &mut left_b, &mut right_b);
    }
    let right_indices = match kind {
        JoinKind::Semi | JoinKind::Anti => None,
        _ => Some(right_b.finish()),
    };
    Ok(JoinIndices {
        left: left_b.finish(),
        right: right_indices,
    })
}

/// Every pairing of `left_rows` x `right_rows`, left-major.
pub(crate) fn cross_indices(left_rows: usize, right_rows: usize) -> JoinIndices {
    let total = left_rows * right_rows;
    let mut left = UInt32Builder::with_capacity(total);
    let mut right = UInt32Builder::with_capacity(total);
    for i in 0..left_rows {
        for j in 0..right_rows {
            left.append_value(i as u32);
            right.append_value(j as u32);
        }
    }
    JoinIndices {
        left: left.finish(),
        right: Some(right.finish()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_indices_are_left_major() {
        let idx = cross_indices(2, 3);
        let left: Vec<u32> = idx.left.values().to_vec();
        let right: Vec<u32> = idx.right.unwrap().values().to_vec();
        assert_eq!(left, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(right, vec![0, 1, 2, 0, 1, 2]);
    }
}
