//! Group-control local error type (§4.6), converting into the shared
//! scheduler error at the crate boundary.

use scheduler_shared::{GroupId, SchedulerError};

pub type Result<T> = std::result::Result<T, GroupError>;

#[derive(thiserror::Error, Debug)]
pub enum GroupError {
    #[error("group {group_id} schedule failed: {message}")]
    ScheduleFailed { group_id: GroupId, message: String },

    #[error("group {group_id} schedule canceled: {reason}")]
    Canceled { group_id: GroupId, reason: String },

    #[error("group {group_id} timed out after {duration_ms}ms: {last_reason}")]
    Timeout {
        group_id: GroupId,
        duration_ms: u64,
        last_reason: String,
    },

    #[error("invalid parameter: {message}")]
    ParamInvalid { message: String },

    #[error(transparent)]
    Queue(#[from] schedule_queue::QueueError),

    #[error("underlayer transport error: {0}")]
    Transport(#[from] underlayer::TransportError),
}

impl From<GroupError> for SchedulerError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::ScheduleFailed { group_id, message } => {
                SchedulerError::GroupScheduleFailed { group_id, message }
            }
            GroupError::Canceled { group_id, reason } => SchedulerError::GroupScheduleFailed {
                group_id,
                message: format!("canceled: {reason}"),
            },
            GroupError::Timeout {
                group_id,
                duration_ms,
                last_reason,
            } => SchedulerError::GroupScheduleFailed {
                group_id,
                message: format!("timed out after {duration_ms}ms: {last_reason}"),
            },
            GroupError::ParamInvalid { message } => SchedulerError::ParamInvalid { message },
            GroupError::Queue(inner) => inner.into(),
            GroupError::Transport(inner) => inner.into(),
        }
    }
}
