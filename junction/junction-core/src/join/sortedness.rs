//! Output sortedness flags. The kinds that drive from the left side in
//! row order (inner, left, semi, anti, as-of, cross) keep every
//! left-origin column's flag: rows are dropped or repeated but never
//! reordered, which preserves non-strict monotonicity. Full joins append
//! unmatched right rows after the ordered prefix, so nothing survives;
//! right-origin columns are gathered by match order and never survive.

use crate::join::schema::{OutputSource, ResolvedJoin};
use crate::join::JoinKind;
use crate::table::Sortedness;

pub(crate) fn propagate(
    kind: JoinKind,
    left_flags: &[Sortedness],
    resolved: &ResolvedJoin,
) -> Vec<Sortedness> {
    resolved
        .columns
        .iter()
        .map(|source| match source {
            _ if kind == JoinKind::Full => Sortedness::Unordered,
            OutputSource::Left(i) => left_flags[*i],
            OutputSource::Right(_) | OutputSource::Coalesced { .. } => Sortedness::Unordered,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::schema::resolve;
    use crate::join::{JoinKeySpec, JoinSpec};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn flags(kind: JoinKind) -> Vec<Sortedness> {
        let left = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, true),
            Field::new("v", DataType::Utf8, true),
        ]));
        let right = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, true),
            Field::new("w", DataType::Utf8, true),
        ]));
        let resolved = resolve(&left, &right, &JoinSpec::new(kind, JoinKeySpec::on(["k"]))).unwrap();
        propagate(
            kind,
            &[Sortedness::Ascending, Sortedness::Descending],
            &resolved,
        )
    }

    #[test]
    fn order_preserving_kinds_keep_left_flags() {
        for kind in [JoinKind::Inner, JoinKind::Left] {
            assert_eq!(
                flags(kind),
                vec![
                    Sortedness::Ascending,
                    Sortedness::Descending,
                    Sortedness::Unordered
                ]
            );
        }
        assert_eq!(
            flags(JoinKind::Semi),
            vec![Sortedness::Ascending, Sortedness::Descending]
        );
    }

    #[test]
    fn full_joins_lose_everything() {
        assert_eq!(
            flags(JoinKind::Full),
            vec![
                Sortedness::Unordered,
                Sortedness::Unordered,
                Sortedness::Unordered
            ]
        );
    }
}
