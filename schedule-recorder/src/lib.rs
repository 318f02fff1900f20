//! Schedule recorder: a last-error cache keyed by request id (§7 "the
//! schedule recorder captures the last ..."), grounded on
//! `schedule_recorder.h`'s `TryQueryScheduleErr`/`RecordScheduleErr`/
//! `EraseScheduleErr` trio.
//!
//! Used by `instance-control` and `group-control` to remember the most
//! informative failure reason seen for a request across retries, so a
//! timeout can surface "resource not enough on unit X" instead of a bare
//! "timed out".

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use scheduler_shared::{RequestId, RetryClass, SchedulerError};
use tracing::debug;

/// A snapshot of the most recent failure for a request. `SchedulerError`
/// itself isn't `Clone` (its `Serialization`/`Config` variants wrap
/// foreign error types), so the recorder stores this lightweight summary
/// instead of the error value.
#[derive(Debug, Clone)]
pub struct RecordedError {
    pub message: String,
    pub retry_class: RetryClass,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedError {
    pub fn from_error(err: &SchedulerError) -> Self {
        Self {
            message: err.to_string(),
            retry_class: err.retry_class(),
            recorded_at: Utc::now(),
        }
    }
}

/// Thread-safe last-error cache. One instance is shared (via `Arc`)
/// across the primary and virtual schedule queues, matching the single
/// `ScheduleRecorder` actor the C++ driver wires into both.
#[derive(Debug, Default)]
pub struct ScheduleRecorder {
    errors: DashMap<RequestId, RecordedError>,
}

impl ScheduleRecorder {
    pub fn new() -> Self {
        Self {
            errors: DashMap::new(),
        }
    }

    /// `RecordScheduleErr`.
    pub fn record(&self, request_id: RequestId, err: &SchedulerError) {
        debug!(%request_id, error = %err, "recording schedule error");
        self.errors.insert(request_id, RecordedError::from_error(err));
    }

    /// `TryQueryScheduleErr`: returns the last recorded error for
    /// `request_id`, if any, without removing it.
    pub fn try_query(&self, request_id: &RequestId) -> Option<RecordedError> {
        self.errors.get(request_id).map(|entry| entry.clone())
    }

    /// `EraseScheduleErr`: clears the cached error once a request
    /// finally succeeds or is abandoned.
    pub fn erase(&self, request_id: &RequestId) {
        self.errors.remove(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_queries_the_last_error() {
        let recorder = ScheduleRecorder::new();
        let request_id = RequestId::random();
        let err = SchedulerError::ResourceNotEnough { request_id };
        recorder.record(request_id, &err);

        let recorded = recorder.try_query(&request_id).expect("recorded error");
        assert_eq!(recorded.retry_class, RetryClass::ResourceNotEnough);
    }

    #[test]
    fn later_record_overwrites_earlier_one() {
        let recorder = ScheduleRecorder::new();
        let request_id = RequestId::random();
        recorder.record(request_id, &SchedulerError::ParamInvalid { message: "bad".into() });
        recorder.record(
            request_id,
            &SchedulerError::ResourceNotEnough { request_id },
        );

        let recorded = recorder.try_query(&request_id).unwrap();
        assert_eq!(recorded.retry_class, RetryClass::ResourceNotEnough);
    }

    #[test]
    fn erase_clears_the_cache_entry() {
        let recorder = ScheduleRecorder::new();
        let request_id = RequestId::random();
        recorder.record(request_id, &SchedulerError::ParamInvalid { message: "bad".into() });
        recorder.erase(&request_id);
        assert!(recorder.try_query(&request_id).is_none());
    }
}
