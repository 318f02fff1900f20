//! `ResourceView`: the authoritative (local) or replicated (domain)
//! `ResourceUnit` tree for one process, plus change-log emission (§4.2).
//!
//! This is a plain, synchronous data structure: per §5 ("within one actor,
//! data structures are owned exclusively and require no locking") the
//! owning actor holds it behind `&mut self` and drives it from its
//! mailbox loop; there is no internal `Mutex`/`RwLock`.

use crate::change::{
    merge_local_resource_view_changes, InstanceChange, InstanceChangeKind, LabelChange,
    LoggedChange, ResourceChange, ResourceUnitChange, ResourceUnitChanges,
};
use crate::error::{Result, ViewError};
use crate::idle_recycle::{self, IdleToRecyclePolicy};
use crate::unit::{mem_cpu_shape, Bucket, InstanceInfo, MemKey, RatioKey, ResourceUnit, UnitStatus, ViewInitTime};
use resource_algebra::Resources;
use scheduler_shared::time::Timestamp;
use scheduler_shared::{InstanceId, RequestId, UnitId};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Static,
    Actual,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub capacity: Option<Resources>,
    pub allocatable: Option<Resources>,
    pub actual_use: Option<Resources>,
}

/// One instance to add, with an optional promise resolved in place
/// (§4.2 `AddInstances`).
pub struct InstanceAllocatedInfo {
    pub instance: InstanceInfo,
    pub allocated_promise: Option<Box<dyn FnOnce(Result<()>) + Send>>,
}

impl InstanceAllocatedInfo {
    pub fn new(instance: InstanceInfo) -> Self {
        Self {
            instance,
            allocated_promise: None,
        }
    }

    pub fn with_promise(mut self, promise: Box<dyn FnOnce(Result<()>) + Send>) -> Self {
        self.allocated_promise = Some(promise);
        self
    }

    fn resolve(self, result: Result<()>) {
        if let Some(promise) = self.allocated_promise {
            promise(result);
        }
    }
}

/// Per-local bookkeeping the domain keeps alongside its replicated copy
/// of that local's units (§4.2 `AddResourceUnitWithUrl`,
/// `UpdateResourceUnitDelta`).
#[derive(Debug, Clone)]
struct ReplicaState {
    view_init_time: ViewInitTime,
    last_applied_revision: u64,
    url: String,
    needs_recover: bool,
}

fn resources_scalar_value(resources: &Resources, name: &str) -> Option<i64> {
    match resources.get(name)? {
        resource_algebra::Resource::Scalar(s) => Some(s.thousandths()),
        resource_algebra::Resource::Vector(_) => None,
    }
}

fn unit_shape(unit: &ResourceUnit) -> (RatioKey, MemKey) {
    let mem = resources_scalar_value(&unit.capacity, "memory").unwrap_or(0) / 1000;
    let cpu = resources_scalar_value(&unit.capacity, "cpu").unwrap_or(0);
    mem_cpu_shape(mem, cpu)
}

#[derive(Default)]
pub struct ResourceViewSettings {
    pub require_cpu_memory: bool,
    pub tenant_affinity_enabled: bool,
    pub tenant_default_idle: Duration,
}

/// Owns the tree of `ResourceUnit`s this process either authors (local
/// tier) or replicates (domain tier), the bucket index aggregated across
/// them, and the windowed change log used for delta replication.
pub struct ResourceView {
    local_id: UnitId,
    view_init_time: ViewInitTime,
    units: BTreeMap<UnitId, ResourceUnit>,
    /// Aggregate bucket index over every managed unit, keyed by shape.
    /// See the design note on `ResourceUnit` in `unit.rs` for why this
    /// lives here instead of on each leaf.
    bucket_indexs: BTreeMap<RatioKey, BTreeMap<MemKey, Bucket>>,
    /// The shape each unit was last indexed under, so a unit can be
    /// removed from `bucket_indexs` without recomputing its shape from a
    /// capacity that may already have changed or been deleted.
    unit_shapes: BTreeMap<UnitId, (RatioKey, MemKey)>,
    revision: u64,
    last_reported_revision: u64,
    change_log: Vec<LoggedChange>,
    replicas: BTreeMap<UnitId, ReplicaState>,
    reuse_deadlines: BTreeMap<UnitId, Timestamp>,
    hosted_tenant: std::collections::BTreeSet<UnitId>,
    settings: ResourceViewSettings,
}

impl ResourceView {
    pub fn new(local_id: UnitId, settings: ResourceViewSettings) -> Self {
        Self {
            local_id,
            view_init_time: ViewInitTime::new(),
            units: BTreeMap::new(),
            bucket_indexs: BTreeMap::new(),
            unit_shapes: BTreeMap::new(),
            revision: 0,
            last_reported_revision: 0,
            change_log: Vec::new(),
            replicas: BTreeMap::new(),
            reuse_deadlines: BTreeMap::new(),
            hosted_tenant: std::collections::BTreeSet::new(),
            settings,
        }
    }

    pub fn view_init_time(&self) -> ViewInitTime {
        self.view_init_time
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn unit(&self, id: &UnitId) -> Option<&ResourceUnit> {
        self.units.get(id)
    }

    pub fn units(&self) -> impl Iterator<Item = &ResourceUnit> {
        self.units.values()
    }

    /// Read-only view of the bucket index, consulted by the scheduling
    /// framework to find a shape-matching candidate across the whole view.
    pub fn bucket(&self, ratio: RatioKey, mem: MemKey) -> Option<&Bucket> {
        self.bucket_indexs.get(&ratio).and_then(|by_mem| by_mem.get(&mem))
    }

    fn bucket_mut(&mut self, ratio: RatioKey, mem: MemKey) -> &mut Bucket {
        self.bucket_indexs
            .entry(ratio)
            .or_default()
            .entry(mem)
            .or_default()
    }

    /// Drops `unit_id` from the bucket index entirely, using its
    /// last-known shape rather than recomputing from (possibly stale or
    /// removed) capacity.
    fn forget_unit_shape(&mut self, unit_id: &UnitId) {
        if let Some((ratio, mem)) = self.unit_shapes.remove(unit_id) {
            if let Some(by_mem) = self.bucket_indexs.get_mut(&ratio) {
                if let Some(bucket) = by_mem.get_mut(&mem) {
                    bucket.remove_unit(unit_id);
                    if bucket.total.monopoly_num == 0 && bucket.total.shared_num == 0 {
                        by_mem.remove(&mem);
                    }
                }
                if by_mem.is_empty() {
                    self.bucket_indexs.remove(&ratio);
                }
            }
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn log_change(&mut self, unit_id: UnitId, change: ResourceUnitChange) -> u64 {
        let revision = self.next_revision();
        self.change_log.push(LoggedChange {
            resource_unit_id: unit_id,
            revision,
            change,
        });
        revision
    }

    /// §4.2 `AddResourceUnit`.
    pub fn add_resource_unit(&mut self, mut unit: ResourceUnit) -> Result<()> {
        if self.units.contains_key(&unit.id) {
            return Err(ViewError::DuplicateUnit(unit.id));
        }
        unit.capacity
            .validate()
            .map_err(|source| ViewError::Algebra {
                unit_id: unit.id,
                source,
            })?;
        unit.allocatable
            .validate()
            .map_err(|source| ViewError::Algebra {
                unit_id: unit.id,
                source,
            })?;
        if self.settings.require_cpu_memory
            && (unit.capacity.get("cpu").is_none() || unit.capacity.get("memory").is_none())
        {
            return Err(ViewError::MissingCpuOrMemory(unit.id));
        }

        let was_empty = unit.is_empty_of_instances();
        let carried_instances: Vec<InstanceInfo> = unit.instances.values().cloned().collect();
        unit.instances.clear();

        let id = unit.id;
        let shape = unit_shape(&unit);
        if was_empty {
            self.unit_shapes.insert(id, shape);
            self.bucket_mut(shape.0, shape.1).note_empty_unit(id);
        }

        self.units.insert(id, unit.clone());
        self.log_change(
            id,
            ResourceUnitChange::Addition {
                unit: Box::new(unit),
            },
        );

        if !carried_instances.is_empty() {
            let requests: BTreeMap<RequestId, InstanceAllocatedInfo> = carried_instances
                .into_iter()
                .map(|instance| (instance.request_id, InstanceAllocatedInfo::new(instance)))
                .collect();
            let _ = self.add_instances(requests);
        }
        Ok(())
    }

    /// §4.2 `AddResourceUnitWithUrl` — domain-side registration of a
    /// local's view. Rejects a duplicate registration at the same
    /// `view_init_time`; replaces the prior replica if the incarnation
    /// changed.
    pub fn add_resource_unit_with_url(
        &mut self,
        unit: ResourceUnit,
        url: String,
        last_received_revision: u64,
    ) -> Result<()> {
        let id = unit.id;
        if let Some(existing) = self.replicas.get(&id) {
            if existing.view_init_time == unit.view_init_time {
                return Err(ViewError::DuplicateUnit(id));
            }
            // Different incarnation: discard the prior replica outright.
            self.units.remove(&id);
            self.forget_unit_shape(&id);
        }
        self.replicas.insert(
            id,
            ReplicaState {
                view_init_time: unit.view_init_time,
                last_applied_revision: last_received_revision,
                url,
                needs_recover: false,
            },
        );
        self.units.insert(id, unit.clone());
        self.log_change(
            id,
            ResourceUnitChange::Addition {
                unit: Box::new(unit),
            },
        );
        Ok(())
    }

    /// §4.2 `DeleteResourceUnit`.
    pub fn delete_resource_unit(&mut self, id: UnitId) -> Result<()> {
        self.units.remove(&id).ok_or(ViewError::UnitNotFound(id))?;
        self.forget_unit_shape(&id);
        self.reuse_deadlines.remove(&id);
        self.replicas.remove(&id);
        self.hosted_tenant.remove(&id);
        self.log_change(id, ResourceUnitChange::Deletion);
        Ok(())
    }

    /// §4.2 `UpdateResourceUnit`.
    pub fn update_resource_unit(
        &mut self,
        id: UnitId,
        kind: UpdateKind,
        update: ResourceUpdate,
        revision: u64,
    ) -> Result<()> {
        let unit = self.units.get_mut(&id).ok_or(ViewError::UnitNotFound(id))?;
        if revision <= unit.revision {
            return Err(ViewError::StaleRevision {
                unit_id: id,
                given: revision,
                stored: unit.revision,
            });
        }
        let mut resource_change = ResourceChange::default();
        match kind {
            UpdateKind::Static => {
                if let Some(capacity) = update.capacity {
                    capacity.validate().map_err(|source| ViewError::Algebra {
                        unit_id: id,
                        source,
                    })?;
                    unit.capacity = capacity.clone();
                    resource_change.capacity = Some(capacity);
                }
                if let Some(allocatable) = update.allocatable {
                    allocatable
                        .validate()
                        .map_err(|source| ViewError::Algebra {
                            unit_id: id,
                            source,
                        })?;
                    unit.allocatable = allocatable.clone();
                    resource_change.allocatable = Some(allocatable);
                }
                // Recompute bucket membership for the new shape.
                let is_empty = unit.is_empty_of_instances();
                let shape = unit_shape(unit);
                if is_empty {
                    self.forget_unit_shape(&id);
                    self.unit_shapes.insert(id, shape);
                    self.bucket_mut(shape.0, shape.1).note_empty_unit(id);
                }
            }
            UpdateKind::Actual => {
                if let Some(actual_use) = update.actual_use {
                    unit.actual_use = actual_use.clone();
                    resource_change.actual_use = Some(actual_use);
                }
            }
        }
        let unit = self.units.get_mut(&id).ok_or(ViewError::UnitNotFound(id))?;
        unit.revision = revision;
        self.log_change(
            id,
            ResourceUnitChange::Modification {
                instance_changes: Vec::new(),
                status_change: None,
                resource_change: Some(resource_change),
                label_change: None,
            },
        );
        Ok(())
    }

    /// §4.2 `UpdateUnitStatus`.
    pub fn update_unit_status(&mut self, id: UnitId, status: UnitStatus) -> Result<()> {
        let unit = self.units.get_mut(&id).ok_or(ViewError::UnitNotFound(id))?;
        let was_recovering = matches!(unit.status, UnitStatus::Recovering);
        unit.status = status;
        self.log_change(
            id,
            ResourceUnitChange::Modification {
                instance_changes: Vec::new(),
                status_change: Some(status),
                resource_change: None,
                label_change: None,
            },
        );
        if was_recovering && matches!(status, UnitStatus::Normal) {
            self.evaluate_reuse_timer(id, Timestamp::now());
        }
        Ok(())
    }

    /// §4.2 `AddInstances`.
    pub fn add_instances(
        &mut self,
        requests: BTreeMap<RequestId, InstanceAllocatedInfo>,
    ) -> BTreeMap<RequestId, Result<()>> {
        let mut results = BTreeMap::new();
        for (request_id, allocated) in requests {
            let instance = allocated.instance.clone();
            let result = self.add_one_instance(&instance);
            results.insert(request_id, result.clone());
            allocated.resolve(result);
        }
        results
    }

    fn add_one_instance(&mut self, instance: &InstanceInfo) -> Result<()> {
        let unit_id = instance.unit_id;
        if !self.units.contains_key(&unit_id) {
            return Err(ViewError::UnitNotFound(unit_id));
        }
        if self
            .units
            .get(&unit_id)
            .unwrap()
            .instances
            .contains_key(&instance.instance_id)
        {
            return Err(ViewError::InstanceDuplicated {
                instance_id: instance.instance_id,
                unit_id,
            });
        }

        let was_empty = self.units.get(&unit_id).unwrap().is_empty_of_instances();
        {
            let unit = self.units.get_mut(&unit_id).unwrap();
            unit.allocatable = unit
                .allocatable
                .sub(&instance.resources)
                .map_err(|source| ViewError::Algebra { unit_id, source })?;

            if let Some(tenant) = &instance.tenant_id {
                let added = resource_algebra::LabelCounter::from_kv(&format!(
                    "tenant-affinity:{}",
                    tenant
                ));
                unit.node_labels = unit.node_labels.add(&added);
            }
            if let Some(affinity) = &instance.schedule_option.affinity {
                let added = resource_algebra::LabelCounter::from_kv(&format!(
                    "affinity-schedule:{}",
                    affinity
                ));
                unit.node_labels = unit.node_labels.add(&added);
            }
            for (key, value) in &instance.labels {
                let added = resource_algebra::LabelCounter::from_kv(&format!("{}:{}", key, value));
                unit.node_labels = unit.node_labels.add(&added);
            }
        }

        let mem = resources_scalar_value(&instance.resources, "memory").unwrap_or(0) / 1000;
        let cpu = resources_scalar_value(&instance.resources, "cpu").unwrap_or(0);
        let (ratio, mem_key) = mem_cpu_shape(mem, cpu);
        let bucket_entry_has_monopoly = self
            .bucket_indexs
            .get(&ratio)
            .and_then(|by_mem| by_mem.get(&mem_key))
            .and_then(|b| b.allocatable.get(&unit_id))
            .map(|c| c.monopoly_num > 0)
            .unwrap_or(false);

        if was_empty {
            // A fresh placement consumes the unit's own empty-candidacy
            // shape, not the shape of the instance being placed.
            if let Some(shape) = self.unit_shapes.get(&unit_id).copied() {
                if instance.schedule_option.is_monopoly() || bucket_entry_has_monopoly {
                    self.bucket_mut(shape.0, shape.1).note_first_instance(unit_id);
                } else {
                    // Carried-instance registration that was never counted
                    // as a monopoly candidate: just record it as shared.
                    let bucket = self.bucket_mut(shape.0, shape.1);
                    bucket.total.shared_num += 1;
                    bucket.allocatable.entry(unit_id).or_default().shared_num += 1;
                }
            }
        }

        let unit = self.units.get_mut(&unit_id).unwrap();
        if instance.schedule_option.is_monopoly() {
            unit.allocatable = Resources::new();
        }

        unit.instances.insert(instance.instance_id, instance.clone());
        if instance.tenant_id.is_some() {
            self.hosted_tenant.insert(unit_id);
        }
        self.reuse_deadlines.remove(&unit_id);

        self.log_change(
            unit_id,
            ResourceUnitChange::Modification {
                instance_changes: vec![InstanceChange {
                    kind: InstanceChangeKind::Add,
                    instance: instance.clone(),
                }],
                status_change: None,
                resource_change: None,
                label_change: Some(LabelChange {
                    added: resource_algebra::LabelCounter::new(),
                    removed: resource_algebra::LabelCounter::new(),
                }),
            },
        );
        Ok(())
    }

    /// §4.2 `DeleteInstances`.
    pub fn delete_instances(&mut self, ids: &[InstanceId], is_virtual: bool) -> Result<()> {
        for id in ids {
            self.delete_one_instance(*id, is_virtual)?;
        }
        Ok(())
    }

    fn delete_one_instance(&mut self, instance_id: InstanceId, is_virtual: bool) -> Result<()> {
        let unit_id = self
            .units
            .values()
            .find(|u| u.instances.contains_key(&instance_id))
            .map(|u| u.id)
            .ok_or(ViewError::InstanceNotFound(instance_id))?;

        let instance = {
            let unit = self.units.get_mut(&unit_id).unwrap();
            unit.instances.remove(&instance_id).unwrap()
        };

        if instance.schedule_option.is_monopoly() {
            // A monopoly release restores full capacity; the unit is not
            // re-registered as a monopoly candidate (it is being torn
            // down), so bucket counts are left untouched on purpose.
            let unit = self.units.get_mut(&unit_id).unwrap();
            unit.allocatable = unit.capacity.clone();
        } else {
            let unit = self.units.get_mut(&unit_id).unwrap();
            unit.allocatable = unit
                .allocatable
                .add(&instance.resources)
                .map_err(|source| ViewError::Algebra { unit_id, source })?;

            let now_empty = unit.is_empty_of_instances();
            if now_empty {
                if let Some(shape) = self.unit_shapes.get(&unit_id).copied() {
                    self.bucket_mut(shape.0, shape.1)
                        .note_last_instance_removed(unit_id);
                }
            }
        }

        self.log_change(
            unit_id,
            ResourceUnitChange::Modification {
                instance_changes: vec![InstanceChange {
                    kind: InstanceChangeKind::Delete,
                    instance: instance.clone(),
                }],
                status_change: None,
                resource_change: None,
                label_change: None,
            },
        );

        let unit_now_empty = self.units.get(&unit_id).unwrap().is_empty_of_instances();
        if unit_now_empty {
            let already_armed = self.reuse_deadlines.contains_key(&unit_id);
            if !is_virtual || already_armed {
                self.evaluate_reuse_timer(unit_id, Timestamp::now());
            }
        }
        Ok(())
    }

    fn evaluate_reuse_timer(&mut self, unit_id: UnitId, now: Timestamp) {
        let has_hosted_tenant = self.hosted_tenant.contains(&unit_id);
        let Some(unit) = self.units.get(&unit_id) else {
            return;
        };
        if !unit.is_empty_of_instances() {
            return;
        }
        let has_affinity = unit
            .node_labels
            .keys()
            .any(|k| k == "affinity-schedule" || k == idle_recycle::IDLE_TO_RECYCLE_LABEL);
        if !has_affinity && !self.settings.tenant_affinity_enabled {
            return;
        }
        let policy = idle_recycle::resolve_policy(
            &unit.node_labels,
            has_hosted_tenant,
            self.settings.tenant_affinity_enabled,
            self.settings.tenant_default_idle,
        );
        match policy {
            IdleToRecyclePolicy::RecycleAfter(duration) => {
                self.reuse_deadlines.insert(unit_id, now.add(duration));
            }
            IdleToRecyclePolicy::Unlimited | IdleToRecyclePolicy::Ineligible => {
                self.reuse_deadlines.remove(&unit_id);
            }
        }
    }

    /// Polled by the owning actor. Disarms and disables every unit whose
    /// reuse deadline has passed and which is still empty.
    pub fn expire_reuse_timers(&mut self, now: Timestamp) -> Vec<UnitId> {
        let due: Vec<UnitId> = self
            .reuse_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut disabled = Vec::new();
        for id in due {
            self.reuse_deadlines.remove(&id);
            if let Some(unit) = self.units.get_mut(&id) {
                if unit.is_empty_of_instances() {
                    unit.disabled = true;
                    disabled.push(id);
                }
            }
        }
        disabled
    }

    /// §4.2 `UpdateResourceUnitDelta`.
    pub fn update_resource_unit_delta(&mut self, changes: ResourceUnitChanges) -> Result<()> {
        if !changes.is_well_formed() {
            return Err(ViewError::InvertedWindow {
                start: changes.start_revision,
                end: changes.end_revision,
            });
        }
        let replica = self.replicas.get(&changes.local_id).cloned();

        if let Some(replica) = &replica {
            if replica.view_init_time != changes.local_view_init_time {
                self.units.remove(&changes.local_id);
                self.forget_unit_shape(&changes.local_id);
                self.replicas.remove(&changes.local_id);
                return Err(ViewError::ViewReinitialized);
            }
            if changes.end_revision <= replica.last_applied_revision {
                // Already applied (or stale retransmission): discard.
                return Ok(());
            }
            if changes.start_revision > replica.last_applied_revision {
                self.mark_needs_recover(changes.local_id);
                return Err(ViewError::WatermarkGap {
                    start: changes.start_revision,
                    watermark: replica.last_applied_revision,
                });
            }
        }

        for entry in &changes.changes {
            if let Err(err) = self.apply_logged_change(entry) {
                self.mark_needs_recover(changes.local_id);
                return Err(err);
            }
        }

        if let Some(replica) = self.replicas.get_mut(&changes.local_id) {
            replica.last_applied_revision = changes.end_revision;
        }
        Ok(())
    }

    fn mark_needs_recover(&mut self, local_id: UnitId) {
        if let Some(replica) = self.replicas.get_mut(&local_id) {
            replica.needs_recover = true;
        }
    }

    /// Whether the domain's replica of `local_id` requires a full
    /// re-registration before further deltas can be applied.
    pub fn needs_recover(&self, local_id: &UnitId) -> bool {
        self.replicas
            .get(local_id)
            .map(|r| r.needs_recover)
            .unwrap_or(false)
    }

    /// Every local this domain view currently replicates, for the poller
    /// to iterate when pulling windows.
    pub fn known_locals(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.replicas.keys().copied()
    }

    /// Revision the domain last successfully applied for `local_id`, the
    /// window start the poller should request next.
    pub fn replica_last_applied_revision(&self, local_id: &UnitId) -> Option<u64> {
        self.replicas.get(local_id).map(|r| r.last_applied_revision)
    }

    fn apply_logged_change(&mut self, entry: &LoggedChange) -> Result<()> {
        match &entry.change {
            ResourceUnitChange::Addition { unit } => {
                self.units.insert(entry.resource_unit_id, (**unit).clone());
                Ok(())
            }
            ResourceUnitChange::Deletion => {
                self.units
                    .remove(&entry.resource_unit_id)
                    .ok_or(ViewError::UnitNotFound(entry.resource_unit_id))?;
                Ok(())
            }
            ResourceUnitChange::Modification {
                instance_changes,
                status_change,
                resource_change,
                label_change,
            } => {
                let unit = self
                    .units
                    .get_mut(&entry.resource_unit_id)
                    .ok_or(ViewError::UnitNotFound(entry.resource_unit_id))?;
                for change in instance_changes {
                    match change.kind {
                        InstanceChangeKind::Add => {
                            unit.instances
                                .insert(change.instance.instance_id, change.instance.clone());
                        }
                        InstanceChangeKind::Delete => {
                            unit.instances.remove(&change.instance.instance_id);
                        }
                    }
                }
                if let Some(status) = status_change {
                    unit.status = *status;
                }
                if let Some(resource_change) = resource_change {
                    if let Some(capacity) = &resource_change.capacity {
                        unit.capacity = capacity.clone();
                    }
                    if let Some(allocatable) = &resource_change.allocatable {
                        unit.allocatable = allocatable.clone();
                    }
                    if let Some(actual_use) = &resource_change.actual_use {
                        unit.actual_use = actual_use.clone();
                    }
                }
                if let Some(label_change) = label_change {
                    unit.node_labels = unit.node_labels.add(&label_change.added);
                    unit.node_labels = unit.node_labels.sub(&label_change.removed);
                }
                Ok(())
            }
        }
    }

    /// §4.2 `GetResourceViewChanges` — pops the pending windowed delta and
    /// advances `last_reported_revision`. Idempotent on an unchanged view:
    /// two successive calls return empty windows at the same revision.
    pub fn get_resource_view_changes(&mut self) -> ResourceUnitChanges {
        let start = self.last_reported_revision;
        let end = self.revision;
        let changes = self
            .change_log
            .iter()
            .filter(|c| c.revision > start && c.revision <= end)
            .cloned()
            .collect();
        self.last_reported_revision = end;
        // Local-side log: keep only entries still needed for future
        // windows starting before `start` (none, since watermark only
        // advances); safe to truncate everything already reported.
        self.change_log.retain(|c| c.revision > end);
        ResourceUnitChanges {
            local_id: self.local_id,
            local_view_init_time: self.view_init_time,
            start_revision: start,
            end_revision: end,
            changes,
        }
    }

    /// §4.2 `MergeLocalResourceViewChanges` — coalesced window over the
    /// raw change log, without mutating the watermark.
    pub fn merge_resource_view_changes(&self, start: u64, end: u64) -> Vec<LoggedChange> {
        merge_local_resource_view_changes(&self.change_log, start, end, &self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_algebra::{Resource, Resources, ScalarResource};
    use scheduler_shared::RequestId;

    fn scalar_resources(cpu_thousandths: i64, memory_mb: i64) -> Resources {
        let mut resources = Resources::new();
        resources.insert(
            "cpu",
            Resource::Scalar(ScalarResource::from_thousandths(cpu_thousandths)),
        );
        resources.insert(
            "memory",
            Resource::Scalar(ScalarResource::from_thousandths(memory_mb * 1000)),
        );
        resources
    }

    fn settings() -> ResourceViewSettings {
        ResourceViewSettings {
            require_cpu_memory: false,
            tenant_affinity_enabled: false,
            tenant_default_idle: Duration::from_secs(0),
        }
    }

    fn sample_instance(unit_id: UnitId, resources: Resources) -> InstanceInfo {
        InstanceInfo {
            instance_id: scheduler_shared::InstanceId::random(),
            request_id: RequestId::random(),
            unit_id,
            scheduler_chain: vec![unit_id],
            resources,
            actual_use: Resources::new(),
            labels: BTreeMap::new(),
            schedule_option: crate::unit::ScheduleOption::default(),
            group_id: None,
            tenant_id: None,
            function_proxy_id: None,
        }
    }

    #[test]
    fn add_unit_then_schedule_instance_updates_allocatable_and_buckets() {
        let mut view = ResourceView::new(UnitId::random(), settings());
        let unit_id = UnitId::random();
        let mut unit = ResourceUnit::new(unit_id, "node-a", "default");
        unit.capacity = scalar_resources(1000, 1000);
        unit.allocatable = unit.capacity.clone();
        view.add_resource_unit(unit).unwrap();

        let (ratio, mem) = mem_cpu_shape(1000, 1000);
        assert_eq!(view.bucket(ratio, mem).unwrap().total.monopoly_num, 1);

        let instance = sample_instance(unit_id, scalar_resources(300, 128));
        let mut requests = BTreeMap::new();
        let request_id = instance.request_id;
        requests.insert(request_id, InstanceAllocatedInfo::new(instance));
        let results = view.add_instances(requests);
        assert!(results.get(&request_id).unwrap().is_ok());

        let unit = view.unit(&unit_id).unwrap();
        assert_eq!(
            resources_scalar_value(&unit.allocatable, "cpu"),
            Some(700_000)
        );
        assert_eq!(
            resources_scalar_value(&unit.allocatable, "memory"),
            Some(872_000)
        );

        assert_eq!(view.bucket(ratio, mem).unwrap().total.monopoly_num, 0);
        assert_eq!(view.bucket(ratio, mem).unwrap().total.shared_num, 1);
    }

    #[test]
    fn merge_resource_view_changes_collapses_add_instance_status_into_single_addition() {
        let mut view = ResourceView::new(UnitId::random(), settings());
        let unit_id = UnitId::random();
        let mut unit = ResourceUnit::new(unit_id, "node-b", "default");
        unit.capacity = scalar_resources(1000, 1000);
        unit.allocatable = unit.capacity.clone();
        // revision 1: addition
        view.add_resource_unit(unit).unwrap();

        // revision 2: instance addition
        let instance = sample_instance(unit_id, scalar_resources(100, 64));
        let mut requests = BTreeMap::new();
        requests.insert(instance.request_id, InstanceAllocatedInfo::new(instance));
        view.add_instances(requests);

        // revision 3: status change
        view.update_unit_status(unit_id, UnitStatus::Evicting).unwrap();

        assert_eq!(view.revision(), 3);
        let merged = view.merge_resource_view_changes(0, 3);
        assert_eq!(merged.len(), 1);
        match &merged[0].change {
            ResourceUnitChange::Addition { unit } => {
                assert_eq!(unit.status, UnitStatus::Evicting);
                assert_eq!(unit.instances.len(), 1);
            }
            other => panic!("expected a coalesced Addition, got {other:?}"),
        }
    }

    #[test]
    fn delete_resource_unit_clears_its_bucket_entry() {
        let mut view = ResourceView::new(UnitId::random(), settings());
        let unit_id = UnitId::random();
        let mut unit = ResourceUnit::new(unit_id, "node-c", "default");
        unit.capacity = scalar_resources(1000, 1000);
        unit.allocatable = unit.capacity.clone();
        view.add_resource_unit(unit).unwrap();

        let (ratio, mem) = mem_cpu_shape(1000, 1000);
        assert!(view.bucket(ratio, mem).is_some());

        view.delete_resource_unit(unit_id).unwrap();
        assert!(view.bucket(ratio, mem).is_none());
        assert!(view.unit(&unit_id).is_none());
    }

    #[test]
    fn get_resource_view_changes_is_idempotent_on_unchanged_view() {
        let mut view = ResourceView::new(UnitId::random(), settings());
        let first = view.get_resource_view_changes();
        assert!(first.is_empty());
        let second = view.get_resource_view_changes();
        assert!(second.is_empty());
        assert_eq!(first.start_revision, second.start_revision);
    }
}
