//! Request/result shapes carried through the queue (§3 `ScheduleRequest`,
//! §4.4, §4.6 `GroupInfo`).

use crate::cancel::CancelSignal;
use resource_algebra::Resources;
use resource_view::InstanceInfo;
use scheduler_shared::{GroupId, RequestId, UnitId};
use scheduling_framework::PlacementCandidate;
use std::collections::BTreeMap;
use std::time::Duration;

/// §3 `ScheduleRequest.range_opts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeOpts {
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub cur_range_instance_num: i64,
}

/// §3 `ScheduleRequest`. `contexts` carries plugin-specific state keyed by
/// plugin name — opaque to the queue itself, threaded through so a future
/// plugin can stash per-request state across retries.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub request_id: RequestId,
    pub trace_id: String,
    pub instance: InstanceInfo,
    pub schedule_round: u32,
    pub contexts: BTreeMap<String, String>,
    pub range_opts: RangeOpts,
    pub is_range_schedule: bool,
}

impl ScheduleRequest {
    pub fn new(instance: InstanceInfo) -> Self {
        Self {
            request_id: instance.request_id,
            trace_id: String::new(),
            instance,
            schedule_round: 0,
            contexts: BTreeMap::new(),
            range_opts: RangeOpts::default(),
            is_range_schedule: false,
        }
    }
}

/// §4.3's `Score` output, reshaped into a decision result keyed back to
/// the request it was produced for.
#[derive(Debug, Clone)]
pub struct ScheduleResult {
    pub unit_id: UnitId,
    pub allocated_vectors: Resources,
    pub real_ids: Vec<String>,
    pub hetero_product_name: Option<String>,
    pub available_for_request: i64,
}

impl From<PlacementCandidate> for ScheduleResult {
    fn from(candidate: PlacementCandidate) -> Self {
        Self {
            unit_id: candidate.unit_id,
            allocated_vectors: candidate.allocated_vectors,
            real_ids: candidate.real_ids,
            hetero_product_name: candidate.hetero_product_name,
            available_for_request: candidate.available_for_request,
        }
    }
}

/// What `ScheduleDecision` resolves to: either a placement, or a signal
/// that a preemption attempt was just kicked off and the caller
/// (`instance-control`) should retry once the victims are cleared (§4.4
/// "the scheduler then retries the decision against the updated view").
#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    Placed(ScheduleResult),
    PreemptionTriggered,
}

/// §4.6 `GroupInfo.group_opts.group_policy`. The unnamed "…" member in
/// spec.md's `{Range, StrictPack, …}` is the default all-or-nothing gang
/// policy (§4.6 "Default (gang)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum GroupPolicy {
    #[default]
    Gang,
    Range,
    StrictPack,
}

/// A group decision request built by `group-control` (§4.6 "builds a
/// GroupSpec with policy, timeout, range options ... and cancel tag").
#[derive(Clone)]
pub struct GroupSpec {
    pub group_id: GroupId,
    pub trace_id: String,
    pub policy: GroupPolicy,
    pub timeout: Duration,
    pub range_opts: Option<RangeOpts>,
    pub requests: Vec<ScheduleRequest>,
    pub cancel: CancelSignal,
}

/// §4.6's range-schedule update: the owner sees only the successfully
/// placed instance ids in request order; `range_success_num` is `None`
/// for non-range groups (all-or-nothing, so its length always equals
/// `requests.len()`).
#[derive(Debug, Clone, Default)]
pub struct GroupScheduleResult {
    pub results: BTreeMap<RequestId, ScheduleResult>,
    pub range_success_num: Option<usize>,
}
