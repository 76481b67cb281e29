use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use thiserror::Error;

pub type Result<T, E = JoinError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum JoinError {
    /// The join spec itself is malformed: missing keys, unknown columns,
    /// bad tolerance, colliding output names.
    #[error("Invalid join configuration: {0}")]
    Configuration(String),

    /// The key columns cannot be reconciled to a common comparable type.
    #[error("Join key type mismatch: {0}")]
    TypeMismatch(String),

    /// A broken internal invariant. Always a bug, never a user error.
    #[error("Internal error: {0}.\nThis issue was likely caused by a bug in junction's code")]
    Internal(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),
}

macro_rules! config_err {
    ($($args:expr),*) => {
        Err($crate::error::JoinError::Configuration(format!($($args),*)))
    };
}

macro_rules! type_err {
    ($($args:expr),*) => {
        Err($crate::error::JoinError::TypeMismatch(format!($($args),*)))
    };
}

macro_rules! internal_err {
    ($($args:expr),*) => {
        Err($crate::error::JoinError::Internal(format!($($args),*)))
    };
}

pub(crate) use config_err;
pub(crate) use internal_err;
pub(crate) use type_err;
