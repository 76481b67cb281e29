//! junction-core: a columnar join engine over Arrow record batches.
//!
//! Equality joins (inner / left / full-outer / semi / anti), cross joins,
//! and ordered as-of joins, with hash and sort-merge strategies, `_right`
//! schema suffixing, sortedness-flag propagation, and a bounded-memory
//! streaming mode.

pub mod error;
pub mod join;
pub mod streaming;
pub mod table;

pub use error::{JoinError, Result};
pub use join::{
    join, AsofDirection, AsofOptions, JoinAlgorithm, JoinKeySpec, JoinKind, JoinSpec, KeyExpr,
};
pub use streaming::{join_stream, JoinStream, SendableBatchStream};
pub use table::{Sortedness, Table};
