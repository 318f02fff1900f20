//! Instance-control local error type (§4.5), converting into the shared
//! scheduler error at the crate boundary.

use scheduler_shared::{RequestId, SchedulerError};

pub type Result<T> = std::result::Result<T, InstanceError>;

#[derive(thiserror::Error, Debug)]
pub enum InstanceError {
    #[error("resource not enough for request {request_id} after {tries} tries")]
    ResourceNotEnough { request_id: RequestId, tries: u32 },

    #[error("affinity schedule failed for request {request_id}: {message}")]
    AffinityScheduleFailed { request_id: RequestId, message: String },

    #[error("schedule canceled for request {request_id}: {reason}")]
    Canceled { request_id: RequestId, reason: String },

    #[error("request {request_id} timed out after {duration_ms}ms: {last_reason}")]
    Timeout {
        request_id: RequestId,
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

impl From<InstanceError> for SchedulerError {
    fn from(err: InstanceError) -> Self {
        match err {
            InstanceError::ResourceNotEnough { request_id, .. } => {
                SchedulerError::ResourceNotEnough { request_id }
            }
            InstanceError::AffinityScheduleFailed { request_id, message } => {
                SchedulerError::AffinityScheduleFailed { request_id, message }
            }
            InstanceError::Canceled { request_id, .. } => {
                SchedulerError::ScheduleCanceled { request_id }
            }
            InstanceError::Timeout { request_id, duration_ms, last_reason } => {
                SchedulerError::Timeout { request_id, duration_ms, last_reason }
            }
            InstanceError::ParamInvalid { message } => SchedulerError::ParamInvalid { message },
            InstanceError::Queue(inner) => inner.into(),
            InstanceError::Transport(inner) => inner.into(),
        }
    }
}
