//! Leaf error type for resource-view operations, converted into the
//! shared top-level error at crate boundaries.

use resource_algebra::AlgebraError;
use scheduler_shared::{SchedulerError, UnitId};

pub type Result<T> = std::result::Result<T, ViewError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("resource unit id is empty")]
    EmptyUnitId,

    #[error("resource unit {0} already exists")]
    DuplicateUnit(UnitId),

    #[error("resource unit {0} not found")]
    UnitNotFound(UnitId),

    #[error("resource unit {0} is missing required CPU or Memory resources")]
    MissingCpuOrMemory(UnitId),

    #[error("resource algebra error on unit {unit_id}: {source}")]
    Algebra {
        unit_id: UnitId,
        source: AlgebraError,
    },

    #[error("instance {instance_id} is already in flight on unit {unit_id}")]
    InstanceDuplicated {
        instance_id: scheduler_shared::InstanceId,
        unit_id: UnitId,
    },

    #[error("instance {0} not found")]
    InstanceNotFound(scheduler_shared::InstanceId),

    #[error("update revision {given} does not exceed stored revision {stored} for unit {unit_id}")]
    StaleRevision {
        unit_id: UnitId,
        given: u64,
        stored: u64,
    },

    #[error("delta window start_revision {start} exceeds end_revision {end}")]
    InvertedWindow { start: u64, end: u64 },

    #[error("delta window start_revision {start} is ahead of watermark {watermark}: full re-sync required")]
    WatermarkGap { start: u64, watermark: u64 },

    #[error("local view_init_time changed: full re-initialization required")]
    ViewReinitialized,

    #[error("local replica for unit {0} needs full recovery")]
    NeedRecoverView(UnitId),
}

impl From<ViewError> for SchedulerError {
    fn from(err: ViewError) -> Self {
        match &err {
            ViewError::Algebra { .. } | ViewError::MissingCpuOrMemory(_) => {
                SchedulerError::ResourceConfigError {
                    message: err.to_string(),
                }
            }
            ViewError::InstanceDuplicated {
                instance_id,
                unit_id,
            } => SchedulerError::InstanceDuplicated {
                instance_id: *instance_id,
                unit_id: *unit_id,
            },
            _ => SchedulerError::InnerSystemError {
                message: err.to_string(),
            },
        }
    }
}
