//! Join specification types and the single-shot entry point.

mod asof;
mod gather;
mod hash;
mod keys;
mod merge;
mod schema;
mod sortedness;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use datafusion::common::ScalarValue;
use datafusion::physical_expr::PhysicalExpr;
use log::debug;

use crate::error::{config_err, Result};
use crate::table::{Sortedness, Table};

pub(crate) use gather::{gather, JoinIndices};
pub(crate) use hash::{append_unmatched_right, cross_indices, probe_into, JoinHashIndex};
pub(crate) use keys::{KeyEncoder, SideKeys};
pub(crate) use schema::{resolve, ResolvedJoin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Full,
    Semi,
    Anti,
    Cross,
    Asof,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
            JoinKind::Full => "full",
            JoinKind::Semi => "semi",
            JoinKind::Anti => "anti",
            JoinKind::Cross => "cross",
            JoinKind::Asof => "as-of",
        };
        write!(f, "{name}")
    }
}

/// A join key: a column name or a pre-built physical expression over the
/// input batch.
#[derive(Debug, Clone)]
pub enum KeyExpr {
    Name(String),
    Expr(Arc<dyn PhysicalExpr>),
}

impl From<&str> for KeyExpr {
    fn from(name: &str) -> Self {
        KeyExpr::Name(name.to_string())
    }
}

impl From<String> for KeyExpr {
    fn from(name: String) -> Self {
        KeyExpr::Name(name)
    }
}

impl From<Arc<dyn PhysicalExpr>> for KeyExpr {
    fn from(expr: Arc<dyn PhysicalExpr>) -> Self {
        KeyExpr::Expr(expr)
    }
}

#[derive(Debug, Clone, Default)]
pub enum JoinKeySpec {
    /// Cross joins only.
    #[default]
    None,
    /// Same column names on both sides.
    On(Vec<String>),
    /// Independent keys per side, names or expressions, same length.
    LeftRight {
        left_on: Vec<KeyExpr>,
        right_on: Vec<KeyExpr>,
    },
}

impl JoinKeySpec {
    pub fn on<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JoinKeySpec::On(names.into_iter().map(Into::into).collect())
    }

    pub fn left_right<L, R, LK, RK>(left_on: L, right_on: R) -> Self
    where
        L: IntoIterator<Item = LK>,
        R: IntoIterator<Item = RK>,
        LK: Into<KeyExpr>,
        RK: Into<KeyExpr>,
    {
        JoinKeySpec::LeftRight {
            left_on: left_on.into_iter().map(Into::into).collect(),
            right_on: right_on.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsofDirection {
    #[default]
    Backward,
    Forward,
    Nearest,
}

#[derive(Debug, Clone, Default)]
pub struct AsofOptions {
    pub direction: AsofDirection,
    /// Inclusive match window around the left key, in the coerced key's
    /// unit; must cast to that type and be non-negative.
    pub tolerance: Option<ScalarValue>,
    pub left_by: Vec<String>,
    pub right_by: Vec<String>,
}

impl AsofOptions {
    pub fn new(direction: AsofDirection) -> Self {
        Self {
            direction,
            ..Default::default()
        }
    }

    pub fn with_tolerance(mut self, tolerance: ScalarValue) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Same grouping column names on both sides.
    pub fn with_by<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.left_by = names.clone();
        self.right_by = names;
        self
    }

    pub fn with_by_each<L, R, S, T>(mut self, left: L, right: R) -> Self
    where
        L: IntoIterator<Item = S>,
        R: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.left_by = left.into_iter().map(Into::into).collect();
        self.right_by = right.into_iter().map(Into::into).collect();
        self
    }
}

/// Strategy selector. `Auto` prefers the merge path when the inputs are
/// flagged sorted on the whole key; `SortMerge` is the same preference
/// stated explicitly and still falls back to hashing when the flags are
/// missing, because the merge path trusts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinAlgorithm {
    #[default]
    Auto,
    Hash,
    SortMerge,
}

impl fmt::Display for JoinAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinAlgorithm::Auto => "auto",
            JoinAlgorithm::Hash => "hash",
            JoinAlgorithm::SortMerge => "sortmerge",
        };
        write!(f, "{name}")
    }
}

impl FromStr for JoinAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(JoinAlgorithm::Auto),
            "hash" => Ok(JoinAlgorithm::Hash),
            "sortmerge" | "sort-merge" | "sort_merge" => Ok(JoinAlgorithm::SortMerge),
            _ => Err(format!("Unknown join algorithm: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub keys: JoinKeySpec,
    pub asof: Option<AsofOptions>,
    /// Appended to right column names that collide with left ones.
    pub suffix: String,
    pub algorithm: JoinAlgorithm,
}

impl JoinSpec {
    pub fn new(kind: JoinKind, keys: JoinKeySpec) -> Self {
        Self {
            kind,
            keys,
            asof: None,
            suffix: "_right".to_string(),
            algorithm: JoinAlgorithm::Auto,
        }
    }

    pub fn cross() -> Self {
        Self::new(JoinKind::Cross, JoinKeySpec::None)
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_algorithm(mut self, algorithm: JoinAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_asof(mut self, options: AsofOptions) -> Self {
        self.asof = Some(options);
        self
    }
}

/// Joins two tables in one shot and returns a new table with recomputed
/// sortedness flags.
pub fn join(left: &Table, right: &Table, spec: &JoinSpec) -> Result<Table> {
    let resolved = resolve(&left.schema(), &right.schema(), spec)?;
    check_row_capacity(left.num_rows(), right.num_rows())?;

    let left_batch = left.to_batch()?;
    let right_batch = right.to_batch()?;

    let batch = match spec.kind {
        JoinKind::Cross => {
            let indices = cross_indices(left_batch.num_rows(), right_batch.num_rows());
            gather::gather(&resolved, &left_batch, &right_batch, None, &indices)?
        }
        JoinKind::Asof => {
            let options = spec.asof.clone().unwrap_or_default();
            let indices = asof::asof_join_indices(&left_batch, &right_batch, &resolved, &options)?;
            gather::gather(&resolved, &left_batch, &right_batch, None, &indices)?
        }
        _ => {
            let merge_descending = sorted_key_direction(spec, left, right, &resolved);
            let encoder =
                KeyEncoder::try_new(&resolved.common_types, merge_descending == Some(true))?;
            let left_keys = encoder.encode(&left_batch, &resolved.left_keys)?;
            let right_keys = encoder.encode(&right_batch, &resolved.right_keys)?;
            let indices = if merge_descending.is_some() {
                debug!("both sides flagged sorted on the key, taking the merge path");
                merge::merge_join_indices(&left_keys, &right_keys, spec.kind)?
            } else {
                hash::hash_join_indices(&left_keys, &right_keys, spec.kind)?
            };
            gather::gather(
                &resolved,
                &left_batch,
                &right_batch,
                Some((&left_keys.arrays, &right_keys.arrays)),
                &indices,
            )?
        }
    };

    let flags = sortedness::propagate(spec.kind, left.sortedness(), &resolved);
    Ok(Table::from_parts(
        resolved.output_schema.clone(),
        vec![batch],
        flags,
    ))
}

pub(crate) fn check_row_capacity(left_rows: usize, right_rows: usize) -> Result<()> {
    if left_rows > u32::MAX as usize || right_rows > u32::MAX as usize {
        return config_err!(
            "inputs of {left_rows} x {right_rows} rows exceed the u32 row-index capacity"
        );
    }
    Ok(())
}

/// The merge path is only sound when every key is a plain column flagged
/// with one consistent direction on both sides, for a kind whose merge
/// output matches the hash output. Returns the shared direction
/// (`Some(true)` = descending) or `None` to fall back to hashing.
fn sorted_key_direction(
    spec: &JoinSpec,
    left: &Table,
    right: &Table,
    resolved: &ResolvedJoin,
) -> Option<bool> {
    if spec.algorithm == JoinAlgorithm::Hash {
        return None;
    }
    if !matches!(spec.kind, JoinKind::Inner | JoinKind::Left) {
        return None;
    }
    let mut direction: Option<Sortedness> = None;
    for (lk, rk) in resolved.left_keys.iter().zip(resolved.right_keys.iter()) {
        let (li, ri) = (lk.column_index()?, rk.column_index()?);
        let flag = left.sortedness()[li];
        if !flag.is_sorted() || right.sortedness()[ri] != flag {
            return None;
        }
        match direction {
            None => direction = Some(flag),
            Some(d) if d != flag => return None,
            Some(_) => {}
        }
    }
    direction.map(|d| d == Sortedness::Descending)
}
