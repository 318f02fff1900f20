//! `ResourceUnit`, `InstanceInfo` and bucket accounting (§3).

use resource_algebra::{LabelCounter, Resources};
use scheduler_shared::{GroupId, InstanceId, RequestId, TenantId, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Opaque handle that changes whenever a local view is re-initialized.
/// The domain compares it against its stored copy to detect a local
/// restart (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewInitTime(Uuid);

impl ViewInitTime {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewInitTime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Normal,
    Evicting,
    Recovering,
    ToBeDeleted,
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulePolicyName {
    Default,
    Monopoly,
}

impl Default for SchedulePolicyName {
    fn default() -> Self {
        SchedulePolicyName::Default
    }
}

/// Selects which affinity pool/owner an instance request is targeted at.
/// §4.5: a request whose owner is `"default"` and not pool-targeted gets
/// a fresh UUID so its affinity label is unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSelector {
    pub owner: String,
    pub pool: Option<String>,
}

impl ResourceSelector {
    pub fn is_default_owner(&self) -> bool {
        self.owner == "default"
    }

    pub fn targets_pool(&self) -> bool {
        self.pool.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleOption {
    pub priority: i32,
    pub schedule_policy_name: SchedulePolicyName,
    pub scheduletimeout_ms: u64,
    pub affinity: Option<String>,
    pub resource_selector: ResourceSelector,
    pub preempted_allowed: bool,
}

impl ScheduleOption {
    pub fn is_monopoly(&self) -> bool {
        matches!(self.schedule_policy_name, SchedulePolicyName::Monopoly)
    }
}

/// An instance placed on a `ResourceUnit` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: InstanceId,
    pub request_id: RequestId,
    pub unit_id: UnitId,
    pub scheduler_chain: Vec<UnitId>,
    pub resources: Resources,
    pub actual_use: Resources,
    pub labels: BTreeMap<String, String>,
    pub schedule_option: ScheduleOption,
    pub group_id: Option<GroupId>,
    pub tenant_id: Option<TenantId>,
    pub function_proxy_id: Option<String>,
}

/// Candidate counts for a (mem/cpu ratio, mem) shape, tracking how many
/// units could take a whole-pod (monopoly) or shared placement (§3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub monopoly_num: i64,
    pub shared_num: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bucket {
    pub total: BucketCounts,
    pub allocatable: BTreeMap<UnitId, BucketCounts>,
}

impl Bucket {
    /// Registers `unit` as an empty candidate for this shape: +1 monopoly.
    pub fn note_empty_unit(&mut self, unit: UnitId) {
        self.total.monopoly_num += 1;
        let entry = self.allocatable.entry(unit).or_default();
        entry.monopoly_num += 1;
    }

    /// First instance lands on a previously-empty unit: monopoly -= 1,
    /// shared += 1 (§4.2 `AddInstances`).
    pub fn note_first_instance(&mut self, unit: UnitId) {
        self.total.monopoly_num -= 1;
        self.total.shared_num += 1;
        let entry = self.allocatable.entry(unit).or_default();
        entry.monopoly_num -= 1;
        entry.shared_num += 1;
    }

    /// Last instance leaves a unit (non-monopoly release): shared -= 1.
    /// The unit does *not* automatically become a monopoly candidate
    /// again; that only happens if it is re-registered empty.
    pub fn note_last_instance_removed(&mut self, unit: UnitId) {
        self.total.shared_num -= 1;
        if let Some(entry) = self.allocatable.get_mut(&unit) {
            entry.shared_num -= 1;
        }
    }

    pub fn remove_unit(&mut self, unit: &UnitId) {
        if let Some(counts) = self.allocatable.remove(unit) {
            self.total.monopoly_num -= counts.monopoly_num;
            self.total.shared_num -= counts.shared_num;
        }
    }
}

/// Bucket index key: `(mem/cpu ratio, mem value)`, both expressed as
/// fixed-point integers so the index can use `BTreeMap` ordering without
/// float comparison pitfalls (§3 "bucket_indexs: map mem/cpu ratio -> map
/// mem value -> Bucket").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RatioKey(i64);

impl RatioKey {
    /// Builds a ratio key from `mem / cpu`, rounded to three decimal
    /// places of precision (milli-ratio).
    pub fn from_mem_cpu(mem_mb: i64, cpu_thousandths: i64) -> Self {
        if cpu_thousandths == 0 {
            return Self(0);
        }
        Self(((mem_mb as f64 * 1000.0) / (cpu_thousandths as f64 / 1000.0)).round() as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemKey(pub i64);

/// `ResourceUnit`: a node in the view tree (§3). `fragment` is only
/// populated at the domain tier, where it holds the locally-owned
/// children (agents) of a registered local.
///
/// The bucket index (§3 `bucket_indexs`) is not duplicated on every leaf:
/// it is only ever consulted by the scheduling framework to find *any*
/// candidate unit for a shape across a whole view, so `ResourceView`
/// keeps one aggregate index over the units it manages rather than each
/// unit carrying a degenerate single-entry index over itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub id: UnitId,
    pub alias: String,
    pub owner_id: String,
    pub view_init_time: ViewInitTime,
    pub capacity: Resources,
    pub allocatable: Resources,
    pub actual_use: Resources,
    pub instances: BTreeMap<InstanceId, InstanceInfo>,
    pub fragment: BTreeMap<UnitId, ResourceUnit>,
    pub node_labels: LabelCounter,
    pub status: UnitStatus,
    pub revision: u64,
    /// Not part of the wire status enum: set by the idle-to-recycle
    /// timer (§4.2) to pull a unit out of the selection set without
    /// tearing it down outright.
    #[serde(default)]
    pub disabled: bool,
}

impl ResourceUnit {
    pub fn new(id: UnitId, alias: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id,
            alias: alias.into(),
            owner_id: owner_id.into(),
            view_init_time: ViewInitTime::new(),
            capacity: Resources::new(),
            allocatable: Resources::new(),
            actual_use: Resources::new(),
            instances: BTreeMap::new(),
            fragment: BTreeMap::new(),
            node_labels: LabelCounter::new(),
            status: UnitStatus::Normal,
            revision: 0,
            disabled: false,
        }
    }

    pub fn is_empty_of_instances(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Computes the `(ratio, mem)` bucket shape key for a request/capacity
/// expressed as `(mem_mb, cpu_thousandths)`.
pub fn mem_cpu_shape(mem_mb: i64, cpu_thousandths: i64) -> (RatioKey, MemKey) {
    (RatioKey::from_mem_cpu(mem_mb, cpu_thousandths), MemKey(mem_mb))
}
