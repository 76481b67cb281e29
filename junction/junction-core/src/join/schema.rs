//! Resolves a [`JoinSpec`] against two input schemas: validates the key
//! spec, computes the common comparison type per key pair, and plans the
//! output column layout (ordering, right-key omission, `_right` suffixing,
//! full-outer key coalescing). Everything here fails fast, before any row
//! is touched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::physical_expr::PhysicalExpr;

use crate::error::{config_err, Result};
use crate::join::keys::common_key_type;
use crate::join::{AsofOptions, JoinKeySpec, JoinKind, JoinSpec, KeyExpr};

/// A key expression bound to one side's schema.
#[derive(Debug, Clone)]
pub(crate) enum ResolvedKey {
    Column(usize),
    Expr(Arc<dyn PhysicalExpr>),
}

impl ResolvedKey {
    pub(crate) fn column_index(&self) -> Option<usize> {
        match self {
            ResolvedKey::Column(i) => Some(*i),
            ResolvedKey::Expr(_) => None,
        }
    }
}

/// Where an output column's values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputSource {
    Left(usize),
    Right(usize),
    /// Full-outer key column merged by name identity: left value when the
    /// left index is set, right value otherwise. `key` indexes the coerced
    /// key arrays, not a table column.
    Coalesced { key: usize },
}

#[derive(Debug)]
pub(crate) struct ResolvedJoin {
    pub left_keys: Vec<ResolvedKey>,
    pub right_keys: Vec<ResolvedKey>,
    /// Common comparison type per key pair, in key order.
    pub common_types: Vec<DataType>,
    /// As-of grouping columns, resolved per side, plus their common types.
    pub left_by: Vec<usize>,
    pub right_by: Vec<usize>,
    pub by_types: Vec<DataType>,
    pub output_schema: SchemaRef,
    /// Source of each output column, parallel to `output_schema` fields.
    pub columns: Vec<OutputSource>,
}

pub(crate) fn resolve(
    left: &SchemaRef,
    right: &SchemaRef,
    spec: &JoinSpec,
) -> Result<ResolvedJoin> {
    if spec.asof.is_some() && spec.kind != JoinKind::Asof {
        return config_err!("as-of options are only valid for {} joins", JoinKind::Asof);
    }

    let (left_keys, right_keys) = resolve_keys(left, right, spec)?;

    let mut common_types = Vec::with_capacity(left_keys.len());
    for (lk, rk) in left_keys.iter().zip(right_keys.iter()) {
        let lt = key_type(left, lk)?;
        let rt = key_type(right, rk)?;
        common_types.push(common_key_type(&lt, &rt)?);
    }

    let asof = spec.asof.clone().unwrap_or_default();
    let (left_by, right_by, by_types) = if spec.kind == JoinKind::Asof {
        if left_keys.len() != 1 {
            return config_err!(
                "as-of joins take exactly one ordering key, got {}",
                left_keys.len()
            );
        }
        resolve_by(left, right, &asof)?
    } else {
        (vec![], vec![], vec![])
    };

    // Right columns elided from the output, and left key columns that a
    // full join replaces with a coalesced column. Name identity between a
    // key pair is what triggers both; suffixing never applies to keys.
    let mut omit_right: HashSet<usize> = HashSet::new();
    let mut coalesce: HashMap<usize, (usize, usize)> = HashMap::new();
    for (pos, (lk, rk)) in left_keys.iter().zip(right_keys.iter()).enumerate() {
        if let (Some(li), Some(ri)) = (lk.column_index(), rk.column_index()) {
            if left.field(li).name() == right.field(ri).name() {
                omit_right.insert(ri);
                if spec.kind == JoinKind::Full {
                    coalesce.insert(li, (pos, ri));
                }
            }
        }
    }
    for (&lb, &rb) in left_by.iter().zip(right_by.iter()) {
        if left.field(lb).name() == right.field(rb).name() {
            omit_right.insert(rb);
        }
    }

    let mut fields: Vec<Field> = Vec::with_capacity(left.fields().len() + right.fields().len());
    let mut sources: Vec<OutputSource> = Vec::with_capacity(fields.capacity());
    let mut names: HashSet<String> = HashSet::with_capacity(fields.capacity());

    for (i, field) in left.fields().iter().enumerate() {
        let (data_type, nullable, source) = match coalesce.get(&i) {
            Some(&(pos, ri)) => (
                common_types[pos].clone(),
                field.is_nullable() || right.field(ri).is_nullable(),
                OutputSource::Coalesced { key: pos },
            ),
            None => (
                field.data_type().clone(),
                field.is_nullable() || spec.kind == JoinKind::Full,
                OutputSource::Left(i),
            ),
        };
        names.insert(field.name().clone());
        fields.push(Field::new(field.name(), data_type, nullable));
        sources.push(source);
    }

    if !matches!(spec.kind, JoinKind::Semi | JoinKind::Anti) {
        let right_nullable = matches!(spec.kind, JoinKind::Left | JoinKind::Full | JoinKind::Asof);
        for (j, field) in right.fields().iter().enumerate() {
            if omit_right.contains(&j) {
                continue;
            }
            let mut name = field.name().clone();
            if names.contains(&name) {
                name = format!("{}{}", name, spec.suffix);
                if names.contains(&name) {
                    return config_err!(
                        "column '{}' collides with an existing output column even after \
                         suffixing; rename an input column or pick another suffix",
                        name
                    );
                }
            }
            names.insert(name.clone());
            fields.push(Field::new(
                name,
                field.data_type().clone(),
                field.is_nullable() || right_nullable,
            ));
            sources.push(OutputSource::Right(j));
        }
    }

    Ok(ResolvedJoin {
        left_keys,
        right_keys,
        common_types,
        left_by,
        right_by,
        by_types,
        output_schema: Arc::new(Schema::new(fields)),
        columns: sources,
    })
}

fn resolve_keys(
    left: &SchemaRef,
    right: &SchemaRef,
    spec: &JoinSpec,
) -> Result<(Vec<ResolvedKey>, Vec<ResolvedKey>)> {
    match (&spec.keys, spec.kind) {
        (JoinKeySpec::None, JoinKind::Cross) => Ok((vec![], vec![])),
        (_, JoinKind::Cross) => config_err!("cross joins take no join keys"),
        (JoinKeySpec::None, kind) => {
            config_err!("{kind} joins require keys: supply `on` or `left_on`/`right_on`")
        }
        (JoinKeySpec::On(names), _) => {
            if names.is_empty() {
                return config_err!("`on` must name at least one key column");
            }
            let lk = names
                .iter()
                .map(|n| column_key(left, n, "left"))
                .collect::<Result<Vec<_>>>()?;
            let rk = names
                .iter()
                .map(|n| column_key(right, n, "right"))
                .collect::<Result<Vec<_>>>()?;
            Ok((lk, rk))
        }
        (JoinKeySpec::LeftRight { left_on, right_on }, _) => {
            if left_on.is_empty() || right_on.is_empty() {
                return config_err!("`left_on` and `right_on` must name at least one key each");
            }
            if left_on.len() != right_on.len() {
                return config_err!(
                    "`left_on` and `right_on` must have the same length ({} vs {})",
                    left_on.len(),
                    right_on.len()
                );
            }
            let lk = left_on
                .iter()
                .map(|k| expr_key(left, k, "left"))
                .collect::<Result<Vec<_>>>()?;
            let rk = right_on
                .iter()
                .map(|k| expr_key(right, k, "right"))
                .collect::<Result<Vec<_>>>()?;
            Ok((lk, rk))
        }
    }
}

fn resolve_by(
    left: &SchemaRef,
    right: &SchemaRef,
    asof: &AsofOptions,
) -> Result<(Vec<usize>, Vec<usize>, Vec<DataType>)> {
    if asof.left_by.len() != asof.right_by.len() {
        return config_err!(
            "`left_by` and `right_by` must have the same length ({} vs {})",
            asof.left_by.len(),
            asof.right_by.len()
        );
    }
    let mut left_by = Vec::with_capacity(asof.left_by.len());
    let mut right_by = Vec::with_capacity(asof.right_by.len());
    let mut by_types = Vec::with_capacity(asof.left_by.len());
    for (ln, rn) in asof.left_by.iter().zip(asof.right_by.iter()) {
        let li = column_index(left, ln, "left")?;
        let ri = column_index(right, rn, "right")?;
        left_by.push(li);
        right_by.push(ri);
        by_types.push(common_key_type(
            left.field(li).data_type(),
            right.field(ri).data_type(),
        )?);
    }
    Ok((left_by, right_by, by_types))
}

fn column_index(schema: &SchemaRef, name: &str, side: &str) -> Result<usize> {
    match schema.index_of(name) {
        Ok(i) => Ok(i),
        Err(_) => config_err!("key column '{name}' not found in the {side} table"),
    }
}

fn column_key(schema: &SchemaRef, name: &str, side: &str) -> Result<ResolvedKey> {
    column_index(schema, name, side).map(ResolvedKey::Column)
}

fn expr_key(schema: &SchemaRef, key: &KeyExpr, side: &str) -> Result<ResolvedKey> {
    match key {
        KeyExpr::Name(name) => column_key(schema, name, side),
        KeyExpr::Expr(expr) => Ok(ResolvedKey::Expr(expr.clone())),
    }
}

fn key_type(schema: &SchemaRef, key: &ResolvedKey) -> Result<DataType> {
    match key {
        ResolvedKey::Column(i) => Ok(schema.field(*i).data_type().clone()),
        ResolvedKey::Expr(e) => Ok(e.data_type(schema)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JoinError;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};

    fn schema(fields: &[(&str, DataType)]) -> SchemaRef {
        Arc::new(Schema::new(
            fields
                .iter()
                .map(|(n, t)| Field::new(*n, t.clone(), true))
                .collect::<Vec<_>>(),
        ))
    }

    fn spec(kind: JoinKind, keys: JoinKeySpec) -> JoinSpec {
        JoinSpec::new(kind, keys)
    }

    #[test]
    fn inner_on_drops_right_key_and_suffixes_collisions() {
        let left = schema(&[("id", DataType::Int64), ("v", DataType::Utf8)]);
        let right = schema(&[("id", DataType::Int64), ("v", DataType::Utf8)]);
        let r = resolve(&left, &right, &spec(JoinKind::Inner, JoinKeySpec::on(["id"]))).unwrap();
        let names: Vec<_> = r
            .output_schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["id", "v", "v_right"]);
        assert_eq!(
            r.columns,
            vec![
                OutputSource::Left(0),
                OutputSource::Left(1),
                OutputSource::Right(1)
            ]
        );
    }

    #[test]
    fn differently_named_right_key_is_kept() {
        let left = schema(&[("a", DataType::Int64)]);
        let right = schema(&[("b", DataType::Int64), ("p", DataType::Utf8)]);
        let r = resolve(
            &left,
            &right,
            &spec(
                JoinKind::Inner,
                JoinKeySpec::left_right(["a"], ["b"]),
            ),
        )
        .unwrap();
        let names: Vec<_> = r
            .output_schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "p"]);
    }

    #[test]
    fn full_join_coalesces_the_name_identical_key() {
        let left = schema(&[("k", DataType::Int32), ("l", DataType::Utf8)]);
        let right = schema(&[("k", DataType::Int64), ("r", DataType::Utf8)]);
        let r = resolve(&left, &right, &spec(JoinKind::Full, JoinKeySpec::on(["k"]))).unwrap();
        assert_eq!(r.columns[0], OutputSource::Coalesced { key: 0 });
        // coalesced column takes the common comparison type
        assert_eq!(r.output_schema.field(0).data_type(), &DataType::Int64);
        // non-key columns become nullable in a full join
        assert!(r.output_schema.field(1).is_nullable());
    }

    #[test]
    fn semi_output_is_the_left_schema() {
        let left = schema(&[("k", DataType::Int64), ("l", DataType::Utf8)]);
        let right = schema(&[("k", DataType::Int64), ("r", DataType::Utf8)]);
        let r = resolve(&left, &right, &spec(JoinKind::Semi, JoinKeySpec::on(["k"]))).unwrap();
        assert_eq!(r.output_schema.fields().len(), 2);
        assert_eq!(r.columns, vec![OutputSource::Left(0), OutputSource::Left(1)]);
    }

    #[test]
    fn suffixed_collision_is_rejected() {
        let left = schema(&[("k", DataType::Int64), ("v", DataType::Utf8), ("v_right", DataType::Utf8)]);
        let right = schema(&[("k", DataType::Int64), ("v", DataType::Utf8)]);
        let err =
            resolve(&left, &right, &spec(JoinKind::Inner, JoinKeySpec::on(["k"]))).unwrap_err();
        assert!(matches!(err, JoinError::Configuration(_)));
    }

    #[test]
    fn missing_keys_and_cross_keys_are_rejected() {
        let left = schema(&[("k", DataType::Int64)]);
        let right = schema(&[("k", DataType::Int64)]);
        let err = resolve(&left, &right, &spec(JoinKind::Inner, JoinKeySpec::None)).unwrap_err();
        assert!(matches!(err, JoinError::Configuration(_)));
        let err =
            resolve(&left, &right, &spec(JoinKind::Cross, JoinKeySpec::on(["k"]))).unwrap_err();
        assert!(matches!(err, JoinError::Configuration(_)));
    }

    #[test]
    fn unknown_key_column_is_a_configuration_error() {
        let left = schema(&[("k", DataType::Int64)]);
        let right = schema(&[("k", DataType::Int64)]);
        let err =
            resolve(&left, &right, &spec(JoinKind::Inner, JoinKeySpec::on(["nope"]))).unwrap_err();
        assert!(matches!(err, JoinError::Configuration(_)));
    }

    #[test]
    fn irreconcilable_key_types_fail_fast() {
        let left = schema(&[("k", DataType::Utf8)]);
        let right = schema(&[("k", DataType::Int64)]);
        let err =
            resolve(&left, &right, &spec(JoinKind::Inner, JoinKeySpec::on(["k"]))).unwrap_err();
        assert!(matches!(err, JoinError::TypeMismatch(_)));
    }

    #[test]
    fn asof_takes_exactly_one_key() {
        let left = schema(&[("t", DataType::Int64), ("g", DataType::Utf8)]);
        let right = schema(&[("t", DataType::Int64), ("g", DataType::Utf8)]);
        let err = resolve(
            &left,
            &right,
            &spec(JoinKind::Asof, JoinKeySpec::on(["t", "g"])),
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::Configuration(_)));
    }

    #[test]
    fn asof_by_columns_are_omitted_by_name_identity() {
        let left = schema(&[("t", DataType::Int64), ("g", DataType::Utf8)]);
        let right = schema(&[("t", DataType::Int64), ("g", DataType::Utf8), ("q", DataType::Int64)]);
        let s = spec(JoinKind::Asof, JoinKeySpec::on(["t"]))
            .with_asof(AsofOptions::default().with_by(["g"]));
        let r = resolve(&left, &right, &s).unwrap();
        let names: Vec<_> = r
            .output_schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["t", "g", "q"]);
        assert_eq!(r.left_by, vec![1]);
        assert_eq!(r.right_by, vec![1]);
    }

    #[test]
    fn asof_options_on_an_equality_join_are_rejected() {
        let left = schema(&[("k", DataType::Int64)]);
        let right = schema(&[("k", DataType::Int64)]);
        let s = spec(JoinKind::Inner, JoinKeySpec::on(["k"])).with_asof(AsofOptions::default());
        let err = resolve(&left, &right, &s).unwrap_err();
        assert!(matches!(err, JoinError::Configuration(_)));
    }
}
