//! Leaf error type for the scheduling pipeline (§4.3).

use scheduler_shared::SchedulerError;

pub type Result<T> = std::result::Result<T, FrameworkError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameworkError {
    #[error("{resource}: not found")]
    ResourceNotFound { resource: String },

    #[error("{resource}: out of capacity")]
    OutOfCapacity { resource: String },

    #[error("{resource}: not enough")]
    ResourceNotEnough { resource: String },

    #[error("invalid resource available after pre-allocation for unit {unit_id}")]
    InvalidAvailable { unit_id: String },

    #[error("card type not found for {resource}")]
    CardTypeNotFound { resource: String },

    #[error("heterogeneous schedule failed: {reason}")]
    HeterogeneousScheduleFailed { reason: String },

    #[error("invalid plugin context: {message}")]
    InvalidContext { message: String },

    #[error("plugin {name} is not registered")]
    PluginNotRegistered { name: String },

    #[error("required affinity {label} has no match")]
    AffinityNotMatched { label: String },
}

impl From<FrameworkError> for SchedulerError {
    fn from(err: FrameworkError) -> Self {
        match &err {
            FrameworkError::InvalidAvailable { .. } => SchedulerError::ResourceConfigError {
                message: err.to_string(),
            },
            _ => SchedulerError::InnerSystemError {
                message: err.to_string(),
            },
        }
    }
}
