//! Leaf error type for resource arithmetic, converted into the shared
//! top-level error at the `resource-view`/`scheduling-framework` boundary.

use scheduler_shared::SchedulerError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgebraError {
    #[error("resource '{name}' is negative: {value}")]
    Negative { name: String, value: i64 },

    #[error("resource '{name}' type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("vector resource '{name}' device {uuid} slot length mismatch: {left} vs {right}")]
    SlotLengthMismatch {
        name: String,
        uuid: String,
        left: usize,
        right: usize,
    },

    #[error("resources map is empty")]
    Empty,

    #[error("resource name '{key}' does not match entry name '{name}'")]
    NameKeyMismatch { key: String, name: String },
}

impl From<AlgebraError> for SchedulerError {
    fn from(err: AlgebraError) -> Self {
        SchedulerError::ResourceConfigError {
            message: err.to_string(),
        }
    }
}
