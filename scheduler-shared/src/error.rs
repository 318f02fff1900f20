//! Top-level error type and retry taxonomy (§6, §7).

use crate::id::{GroupId, InstanceId, RequestId, UnitId};

/// Result type alias used across the scheduler crates.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Error codes surfaced outward, mapped to POSIX on the way out (§6).
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("resource not enough for request {request_id}")]
    ResourceNotEnough { request_id: RequestId },

    #[error("resource config error: {message}")]
    ResourceConfigError { message: String },

    #[error("affinity schedule failed for request {request_id}: {message}")]
    AffinityScheduleFailed {
        request_id: RequestId,
        message: String,
    },

    #[error("schedule canceled for request {request_id}")]
    ScheduleCanceled { request_id: RequestId },

    #[error("invalid parameter: {message}")]
    ParamInvalid { message: String },

    #[error("group schedule failed for group {group_id}: {message}")]
    GroupScheduleFailed { group_id: GroupId, message: String },

    #[error("instance {instance_id} already in flight for unit {unit_id}")]
    InstanceDuplicated {
        instance_id: InstanceId,
        unit_id: UnitId,
    },

    #[error("etcd operation failed: {message}")]
    EtcdOperationError { message: String },

    #[error("internal scheduler error: {message}")]
    InnerSystemError { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config_err_helper::ConfigLoadError),

    /// §4.8: phrased as "the instance cannot be scheduled within X ms.
    /// <last recorded reason>" using whatever the schedule recorder had
    /// cached for this request, or a generic placeholder if nothing was
    /// recorded.
    #[error("the instance cannot be scheduled within {duration_ms}ms for request {request_id}. {last_reason}")]
    Timeout {
        request_id: RequestId,
        duration_ms: u64,
        last_reason: String,
    },
}

/// Retry taxonomy from §7: every error maps to exactly one class, which
/// drives whether an actor retries silently, retries with scale-up, waits
/// on a heartbeat, or surfaces the error to the caller immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Bad input. Refuse, never retry.
    Parameter,
    /// Contention on a shared resource (e.g. a conflicting bind). Retry
    /// silently without surfacing to the caller.
    TransientConflict,
    /// No capacity currently available. Retry with scale-up if configured,
    /// otherwise surface to the caller.
    ResourceNotEnough,
    /// The local proxy or agent is suspected unhealthy. Retry until the
    /// heartbeat subsystem declares it unavailable.
    LocalAbnormal,
    /// Unrecoverable. Surface immediately.
    Fatal,
}

impl SchedulerError {
    /// Classifies this error per the §7 retry taxonomy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            SchedulerError::ParamInvalid { .. } => RetryClass::Parameter,
            SchedulerError::InstanceDuplicated { .. } => RetryClass::TransientConflict,
            SchedulerError::ResourceNotEnough { .. } => RetryClass::ResourceNotEnough,
            SchedulerError::EtcdOperationError { .. } => RetryClass::LocalAbnormal,
            SchedulerError::Timeout { .. } => RetryClass::LocalAbnormal,
            SchedulerError::ResourceConfigError { .. }
            | SchedulerError::AffinityScheduleFailed { .. }
            | SchedulerError::ScheduleCanceled { .. }
            | SchedulerError::GroupScheduleFailed { .. }
            | SchedulerError::InnerSystemError { .. }
            | SchedulerError::Serialization(_)
            | SchedulerError::Config(_) => RetryClass::Fatal,
        }
    }

    /// Whether an actor holding this error should retry without surfacing
    /// it to the caller (§7 "Intermediate errors ... handled locally").
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.retry_class(),
            RetryClass::TransientConflict | RetryClass::ResourceNotEnough | RetryClass::LocalAbnormal
        )
    }

    /// Error category for metrics/logging.
    pub fn category(&self) -> &'static str {
        match self {
            SchedulerError::ResourceNotEnough { .. } => "resource_not_enough",
            SchedulerError::ResourceConfigError { .. } => "resource_config_error",
            SchedulerError::AffinityScheduleFailed { .. } => "affinity_schedule_failed",
            SchedulerError::ScheduleCanceled { .. } => "schedule_canceled",
            SchedulerError::ParamInvalid { .. } => "param_invalid",
            SchedulerError::GroupScheduleFailed { .. } => "group_schedule_failed",
            SchedulerError::InstanceDuplicated { .. } => "instance_duplicated",
            SchedulerError::EtcdOperationError { .. } => "etcd_operation_error",
            SchedulerError::InnerSystemError { .. } => "inner_system_error",
            SchedulerError::Serialization(_) => "serialization",
            SchedulerError::Config(_) => "config",
            SchedulerError::Timeout { .. } => "timeout",
        }
    }
}

/// Narrow helper module so `config.rs` can define its own leaf error type
/// without creating a dependency cycle with this module.
pub mod config_err_helper {
    #[derive(thiserror::Error, Debug)]
    pub enum ConfigLoadError {
        #[error("failed to read config file {path}: {source}")]
        Io {
            path: String,
            #[source]
            source: std::io::Error,
        },
        #[error("failed to parse config: {0}")]
        Parse(#[from] toml::de::Error),
        #[error("invalid config: {0}")]
        Invalid(String),
    }
}

/// Convenience macros mirroring the teacher's `*_error!` helpers.
#[macro_export]
macro_rules! param_invalid {
    ($msg:expr) => {
        $crate::error::SchedulerError::ParamInvalid {
            message: $msg.to_string(),
        }
    };
}

#[macro_export]
macro_rules! inner_system_error {
    ($msg:expr) => {
        $crate::error::SchedulerError::InnerSystemError {
            message: $msg.to_string(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::RequestId;

    #[test]
    fn resource_not_enough_retries_with_scale_up() {
        let err = SchedulerError::ResourceNotEnough {
            request_id: RequestId::random(),
        };
        assert_eq!(err.retry_class(), RetryClass::ResourceNotEnough);
        assert!(err.is_retryable());
    }

    #[test]
    fn param_invalid_is_never_retried() {
        let err = SchedulerError::ParamInvalid {
            message: "bad shape".into(),
        };
        assert_eq!(err.retry_class(), RetryClass::Parameter);
        assert!(!err.is_retryable());
    }

    #[test]
    fn schedule_canceled_is_fatal_and_surfaced() {
        let err = SchedulerError::ScheduleCanceled {
            request_id: RequestId::random(),
        };
        assert_eq!(err.retry_class(), RetryClass::Fatal);
        assert!(!err.is_retryable());
    }
}
