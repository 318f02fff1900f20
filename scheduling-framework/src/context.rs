//! Per-decision scheduling context threaded through the plugin pipeline
//! (§4.3 `ScheduleContext`).

use resource_algebra::Resources;
use scheduler_shared::UnitId;
use std::collections::BTreeMap;

/// What a scorer plugin allocated on a unit: the exact resource slice to
/// subtract before the next plugin runs, plus (for heterogeneous
/// resources) which device ids were selected.
#[derive(Debug, Clone, Default)]
pub struct AllocatedSlice {
    pub resource: Resources,
    pub real_ids: Vec<String>,
}

/// Carried across the whole pipeline run for one request: what has
/// already been tentatively allocated on each candidate unit by an
/// earlier plugin in the same pass (so later plugins see a consistent
/// "available" view without mutating the `ResourceView` itself), and
/// which units are already spoken for by a prior monopoly selection.
#[derive(Debug, Clone, Default)]
pub struct PreAllocatedContext {
    pub allocated: BTreeMap<UnitId, AllocatedSlice>,
    pub pre_allocated_selected_function_agent_set: std::collections::BTreeSet<UnitId>,
}

impl PreAllocatedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources actually available on `unit_id`, after subtracting
    /// whatever this pass has already tentatively allocated there.
    pub fn available(&self, unit_id: &UnitId, unit_allocatable: &Resources) -> Option<Resources> {
        match self.allocated.get(unit_id) {
            Some(slice) => unit_allocatable.sub(&slice.resource).ok(),
            None => Some(unit_allocatable.clone()),
        }
    }

    pub fn record_allocation(&mut self, unit_id: UnitId, slice: AllocatedSlice) {
        self.allocated.insert(unit_id, slice);
    }
}
