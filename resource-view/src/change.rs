//! `ResourceUnitChange` / `ResourceUnitChanges` and the windowed-change
//! coalescing algorithm (§3, §4.2).

use crate::unit::{InstanceInfo, ResourceUnit, UnitStatus, ViewInitTime};
use resource_algebra::{LabelCounter, Resources};
use scheduler_shared::UnitId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceChangeKind {
    Add,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceChange {
    pub kind: InstanceChangeKind,
    pub instance: InstanceInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceChange {
    pub capacity: Option<Resources>,
    pub allocatable: Option<Resources>,
    pub actual_use: Option<Resources>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelChange {
    pub added: LabelCounter,
    pub removed: LabelCounter,
}

/// Tagged union of the three things that can happen to a `ResourceUnit`
/// between two revisions (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResourceUnitChange {
    Addition {
        unit: Box<ResourceUnit>,
    },
    Deletion,
    Modification {
        instance_changes: Vec<InstanceChange>,
        status_change: Option<UnitStatus>,
        resource_change: Option<ResourceChange>,
        label_change: Option<LabelChange>,
    },
}

impl ResourceUnitChange {
    pub fn modification() -> Self {
        ResourceUnitChange::Modification {
            instance_changes: Vec::new(),
            status_change: None,
            resource_change: None,
            label_change: None,
        }
    }

    pub fn is_empty_modification(&self) -> bool {
        matches!(
            self,
            ResourceUnitChange::Modification {
                instance_changes,
                status_change: None,
                resource_change: None,
                label_change: None,
            } if instance_changes.is_empty()
        )
    }
}

/// A single log entry: a change to `resource_unit_id` that took effect at
/// local revision `revision` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedChange {
    pub resource_unit_id: UnitId,
    pub revision: u64,
    pub change: ResourceUnitChange,
}

/// A bounded window of changes `(start_revision, end_revision]` pulled
/// from one local's change log (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUnitChanges {
    pub local_id: UnitId,
    pub local_view_init_time: ViewInitTime,
    pub start_revision: u64,
    pub end_revision: u64,
    pub changes: Vec<LoggedChange>,
}

impl ResourceUnitChanges {
    pub fn is_well_formed(&self) -> bool {
        self.start_revision <= self.end_revision
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Computes the coalesced window `(start, end]` over `log` per §4.2
/// `MergeLocalResourceViewChanges`:
///
/// - `Add(u)` followed by `Delete(u)` within the window produces nothing;
/// - `Add(u)` then any `Modify*` produces a single `Add` of the unit's
///   current (post-window) state;
/// - a run of only `Modify*` entries collapses per-instance ADD/DELETE
///   pairs (`ADD+DELETE` = nothing, `DELETE+ADD` same id = nothing,
///   `DELETE+ADD+DELETE` = `DELETE`, `ADD+DELETE+ADD` = `ADD`);
/// - inter-unit order of first emission is preserved.
pub fn merge_local_resource_view_changes(
    log: &[LoggedChange],
    start_revision: u64,
    end_revision: u64,
    current_units: &std::collections::BTreeMap<UnitId, ResourceUnit>,
) -> Vec<LoggedChange> {
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct UnitTimeline {
        first_seen_order: usize,
        saw_addition: bool,
        saw_deletion: bool,
        instance_changes: Vec<InstanceChange>,
        status_change: Option<UnitStatus>,
        resource_change: Option<ResourceChange>,
        label_change: Option<LabelChange>,
        last_revision: u64,
    }

    let mut order_counter = 0usize;
    let mut timelines: BTreeMap<UnitId, UnitTimeline> = BTreeMap::new();

    for entry in log {
        if entry.revision <= start_revision || entry.revision > end_revision {
            continue;
        }
        let timeline = timelines.entry(entry.resource_unit_id).or_insert_with(|| {
            let order = order_counter;
            order_counter += 1;
            UnitTimeline {
                first_seen_order: order,
                ..Default::default()
            }
        });
        timeline.last_revision = entry.revision;

        match &entry.change {
            ResourceUnitChange::Addition { .. } => {
                timeline.saw_addition = true;
                timeline.saw_deletion = false;
                timeline.instance_changes.clear();
                timeline.status_change = None;
                timeline.resource_change = None;
                timeline.label_change = None;
            }
            ResourceUnitChange::Deletion => {
                if timeline.saw_addition {
                    // Add(u) then Delete(u) within the window: nothing.
                    timeline.saw_addition = false;
                    timeline.saw_deletion = false;
                    timeline.instance_changes.clear();
                    timeline.status_change = None;
                    timeline.resource_change = None;
                    timeline.label_change = None;
                } else {
                    timeline.saw_deletion = true;
                }
            }
            ResourceUnitChange::Modification {
                instance_changes,
                status_change,
                resource_change,
                label_change,
            } => {
                for change in instance_changes {
                    apply_instance_change(&mut timeline.instance_changes, change.clone());
                }
                if let Some(s) = status_change {
                    timeline.status_change = Some(*s);
                }
                if let Some(r) = resource_change {
                    timeline.resource_change = Some(r.clone());
                }
                if let Some(l) = label_change {
                    timeline.label_change = Some(l.clone());
                }
            }
        }
    }

    let mut ordered: Vec<(UnitId, UnitTimeline)> = timelines.into_iter().collect();
    ordered.sort_by_key(|(_, t)| t.first_seen_order);

    let mut out = Vec::new();
    for (unit_id, timeline) in ordered {
        if timeline.saw_addition {
            // Add(u) possibly followed by Modify*: emit the unit's
            // current snapshot as a single Addition.
            if let Some(unit) = current_units.get(&unit_id) {
                out.push(LoggedChange {
                    resource_unit_id: unit_id,
                    revision: timeline.last_revision,
                    change: ResourceUnitChange::Addition {
                        unit: Box::new(unit.clone()),
                    },
                });
            }
            continue;
        }
        if timeline.saw_deletion {
            out.push(LoggedChange {
                resource_unit_id: unit_id,
                revision: timeline.last_revision,
                change: ResourceUnitChange::Deletion,
            });
            continue;
        }
        let modification = ResourceUnitChange::Modification {
            instance_changes: timeline.instance_changes,
            status_change: timeline.status_change,
            resource_change: timeline.resource_change,
            label_change: timeline.label_change,
        };
        if modification.is_empty_modification() {
            continue;
        }
        out.push(LoggedChange {
            resource_unit_id: unit_id,
            revision: timeline.last_revision,
            change: modification,
        });
    }
    out
}

/// Collapses a single instance's ADD/DELETE history per §4.2:
/// `ADD+DELETE` = nothing, `DELETE+ADD` (same id) = nothing,
/// `DELETE+ADD+DELETE` = `DELETE`, `ADD+DELETE+ADD` = `ADD`.
fn apply_instance_change(existing: &mut Vec<InstanceChange>, incoming: InstanceChange) {
    let id = incoming.instance.instance_id;
    if let Some(pos) = existing
        .iter()
        .position(|c| c.instance.instance_id == id)
    {
        match (existing[pos].kind, incoming.kind) {
            (InstanceChangeKind::Add, InstanceChangeKind::Delete)
            | (InstanceChangeKind::Delete, InstanceChangeKind::Add) => {
                existing.remove(pos);
            }
            _ => {
                existing[pos] = incoming;
            }
        }
        return;
    }
    existing.push(incoming);
}
