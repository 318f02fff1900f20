//! `LabelAffinityFilter` / `LabelAffinityScorePlugin` (§4.3): label-based
//! placement constraints, strict (hard fail) or relaxed (score-only).
//!
//! A request names the affinity label key it cares about in
//! `schedule_option.affinity`; the value to match comes from the
//! instance's own `labels` map under that same key. A unit matches when
//! its `node_labels` counter (§3) has seen that key/value pair from any
//! instance it already hosts. §4.5 notes a request with no specific
//! affinity pool gets a fresh UUID affinity label so it can never
//! accidentally match another tenant's instances.

use crate::context::PreAllocatedContext;
use crate::error::FrameworkError;
use crate::filter::{Filter, Filtered};
use crate::score::{Score, Scored};
use resource_view::{InstanceInfo, ResourceUnit, ResourceView};

fn required_label(instance: &InstanceInfo) -> Option<(&str, &str)> {
    let key = instance.schedule_option.affinity.as_deref()?;
    let value = instance.labels.get(key)?.as_str();
    Some((key, value))
}

fn unit_matches(unit: &ResourceUnit, key: &str, value: &str) -> bool {
    unit.node_labels.get(key, value) > 0
}

pub struct LabelAffinityFilter {
    strict: bool,
}

impl LabelAffinityFilter {
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn relaxed() -> Self {
        Self { strict: false }
    }
}

impl Filter for LabelAffinityFilter {
    fn name(&self) -> &str {
        if self.strict {
            "LabelAffinityFilter(strict)"
        } else {
            "LabelAffinityFilter(relaxed)"
        }
    }

    fn filter(
        &self,
        _ctx: &PreAllocatedContext,
        _view: &ResourceView,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Filtered {
        let Some((key, value)) = required_label(instance) else {
            return Filtered::ok(-1);
        };
        if unit_matches(unit, key, value) {
            return Filtered::ok(-1);
        }
        if self.strict {
            Filtered::rejected(
                FrameworkError::AffinityNotMatched {
                    label: key.to_string(),
                },
                format!("required affinity label {key}={value} has no match on this unit"),
            )
        } else {
            Filtered::ok(-1)
        }
    }
}

pub struct LabelAffinityScorePlugin;

impl LabelAffinityScorePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LabelAffinityScorePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Score for LabelAffinityScorePlugin {
    fn name(&self) -> &str {
        "LabelAffinityScorePlugin"
    }

    fn score(&self, _ctx: &PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> Scored {
        let Some((key, value)) = required_label(instance) else {
            return Scored::default();
        };
        let score = if unit_matches(unit, key, value) { 100.0 } else { 0.0 };
        Scored {
            score,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_algebra::{LabelCounter, Resources};
    use scheduler_shared::UnitId;
    use std::collections::BTreeMap;

    fn unit_with_label(key: &str, value: &str) -> ResourceUnit {
        let mut unit = ResourceUnit::new(UnitId::random(), "node", "default");
        unit.node_labels = LabelCounter::from_kv(&format!("{key}:{value}"));
        unit
    }

    fn instance_requiring(key: &str, value: &str) -> InstanceInfo {
        let mut labels = BTreeMap::new();
        labels.insert(key.to_string(), value.to_string());
        InstanceInfo {
            instance_id: scheduler_shared::InstanceId::random(),
            request_id: scheduler_shared::RequestId::random(),
            unit_id: UnitId::random(),
            scheduler_chain: Vec::new(),
            resources: Resources::new(),
            actual_use: Resources::new(),
            labels,
            schedule_option: resource_view::ScheduleOption {
                affinity: Some(key.to_string()),
                ..Default::default()
            },
            group_id: None,
            tenant_id: None,
            function_proxy_id: None,
        }
    }

    #[test]
    fn strict_filter_rejects_unmatched_affinity() {
        let filter = LabelAffinityFilter::strict();
        let ctx = PreAllocatedContext::new();
        let view = ResourceView::new(UnitId::random(), Default::default());
        let unit = unit_with_label("zone", "east");
        let instance = instance_requiring("zone", "west");
        let result = filter.filter(&ctx, &view, &instance, &unit);
        assert!(!result.is_ok());
    }

    #[test]
    fn relaxed_filter_passes_unmatched_affinity() {
        let filter = LabelAffinityFilter::relaxed();
        let ctx = PreAllocatedContext::new();
        let view = ResourceView::new(UnitId::random(), Default::default());
        let unit = unit_with_label("zone", "east");
        let instance = instance_requiring("zone", "west");
        let result = filter.filter(&ctx, &view, &instance, &unit);
        assert!(result.is_ok());
    }

    #[test]
    fn score_plugin_prefers_matching_unit() {
        let scorer = LabelAffinityScorePlugin::new();
        let ctx = PreAllocatedContext::new();
        let matching = unit_with_label("zone", "west");
        let other = unit_with_label("zone", "east");
        let instance = instance_requiring("zone", "west");
        assert!(scorer.score(&ctx, &instance, &matching).score > scorer.score(&ctx, &instance, &other).score);
    }
}
