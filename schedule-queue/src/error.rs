//! Queue-local error type (§4.4), converting into the shared scheduler
//! error at the crate boundary, following every other crate's
//! `*Error -> SchedulerError` pattern.

use resource_view::ViewError;
use scheduler_shared::{GroupId, RequestId, SchedulerError};
use scheduling_framework::FrameworkError;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum QueueError {
    #[error("schedule canceled for request {request_id}: {reason}")]
    Canceled { request_id: RequestId, reason: String },

    #[error("no eligible unit for request {request_id}")]
    ResourceNotEnough { request_id: RequestId },

    #[error("required affinity has no match for request {request_id}: {message}")]
    AffinityScheduleFailed { request_id: RequestId, message: String },

    #[error("group {group_id} schedule failed: {message}")]
    GroupScheduleFailed { group_id: GroupId, message: String },

    #[error("invalid schedule parameters: {message}")]
    ParamInvalid { message: String },

    #[error(transparent)]
    Framework(#[from] FrameworkError),

    #[error(transparent)]
    View(#[from] ViewError),
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Canceled { request_id, .. } => {
                SchedulerError::ScheduleCanceled { request_id }
            }
            QueueError::ResourceNotEnough { request_id } => {
                SchedulerError::ResourceNotEnough { request_id }
            }
            QueueError::AffinityScheduleFailed { request_id, message } => {
                SchedulerError::AffinityScheduleFailed { request_id, message }
            }
            QueueError::GroupScheduleFailed { group_id, message } => {
                SchedulerError::GroupScheduleFailed { group_id, message }
            }
            QueueError::ParamInvalid { message } => SchedulerError::ParamInvalid { message },
            QueueError::Framework(inner) => inner.into(),
            QueueError::View(inner) => inner.into(),
        }
    }
}
