//! The external "scaler" collaborator (§1 "pods already exist and may be
//! requested from an external scaler service", §4.5, §6
//! `CreateAgent(...) -> CreateAgentResponse`).
//!
//! `instance-control` never creates pods itself; it only asks a
//! registered `Scaler` to, and folds the retry policy described in §4.5
//! around that call. No teacher analogue (the teacher repo has no
//! scale-to-zero/pod-creation concept) — built directly from the spec.

use async_trait::async_trait;
use resource_algebra::Resources;
use resource_view::ResourceSelector;
use scheduler_shared::RequestId;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CreateAgentPayload {
    pub request_id: RequestId,
    pub resources: Resources,
    pub resource_selector: ResourceSelector,
}

#[derive(Debug, Clone)]
pub struct CreateAgentResponse {
    pub code: i32,
    pub message: String,
    pub updated_create_options: BTreeMap<String, String>,
}

/// Implemented by whatever external service can provision a fresh agent
/// pod. Object-safe so `InstanceController` can hold it as a trait
/// object, the same seam `schedule_queue::PreemptHook` and
/// `underlayer`'s transport traits use.
#[async_trait]
pub trait Scaler: Send + Sync {
    async fn create_agent(&self, payload: &CreateAgentPayload) -> Result<CreateAgentResponse, String>;
}

/// §4.5's `CreateAgent` retry loop: retry interval clamped to
/// `[scaler_retry_interval_min, scaler_retry_interval_max]`, up to
/// `max_attempts` or `deadline`, whichever comes first. Returns the last
/// response received, or `None` if every attempt errored or the deadline
/// passed before any attempt got a chance to run.
pub async fn create_agent_with_retry(
    scaler: &dyn Scaler,
    payload: &CreateAgentPayload,
    retry_interval: Duration,
    retry_interval_min: Duration,
    retry_interval_max: Duration,
    max_attempts: u32,
    deadline: tokio::time::Instant,
) -> Option<CreateAgentResponse> {
    let interval = retry_interval.clamp(retry_interval_min, retry_interval_max);
    let mut last = None;
    for attempt in 0..max_attempts {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        match scaler.create_agent(payload).await {
            Ok(response) => {
                last = Some(response);
                break;
            }
            Err(reason) => {
                tracing::warn!(
                    request_id = %payload.request_id,
                    attempt,
                    %reason,
                    "CreateAgent attempt failed"
                );
            }
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(interval.min(remaining)).await;
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyScaler {
        succeed_on_attempt: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Scaler for FlakyScaler {
        async fn create_agent(&self, _payload: &CreateAgentPayload) -> Result<CreateAgentResponse, String> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if attempt + 1 >= self.succeed_on_attempt {
                Ok(CreateAgentResponse {
                    code: 0,
                    message: "ok".to_string(),
                    updated_create_options: BTreeMap::new(),
                })
            } else {
                Err("agent pool exhausted".to_string())
            }
        }
    }

    fn payload() -> CreateAgentPayload {
        CreateAgentPayload {
            request_id: RequestId::random(),
            resources: Resources::new(),
            resource_selector: ResourceSelector::default(),
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_attempt_budget() {
        let scaler = FlakyScaler {
            succeed_on_attempt: 2,
            calls: AtomicU32::new(0),
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let response = create_agent_with_retry(
            &scaler,
            &payload(),
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::from_millis(50),
            3,
            deadline,
        )
        .await;
        assert!(response.is_some());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let scaler = FlakyScaler {
            succeed_on_attempt: 99,
            calls: AtomicU32::new(0),
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let response = create_agent_with_retry(
            &scaler,
            &payload(),
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::from_millis(50),
            3,
            deadline,
        )
        .await;
        assert!(response.is_none());
        assert_eq!(scaler.calls.load(Ordering::SeqCst), 3);
    }
}
