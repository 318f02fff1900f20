//! `DefaultScorer`: scalar-resource scorer for units that already passed
//! `DefaultFilter` (§4.3). spec.md gives an explicit formula only for
//! `DefaultHeterogeneousScorer`; for the plain scalar case it only says
//! units score in `[0, 100]` and the highest wins. We score by remaining
//! headroom after the request lands (a "least requested" style spread,
//! matching the bin-packing-vs-spread tradeoff the monopoly/shared split
//! in `DefaultFilter` already makes explicit): a unit with more capacity
//! left over after placement scores higher, so load spreads across
//! candidates with equal eligibility instead of stacking onto the first
//! one found.

use crate::context::PreAllocatedContext;
use crate::score::{Score, Scored};
use resource_algebra::Resource;
use resource_view::{InstanceInfo, ResourceUnit};

pub struct DefaultScorer;

impl DefaultScorer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DefaultScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Score for DefaultScorer {
    fn name(&self) -> &str {
        "DefaultScorer"
    }

    fn score(&self, ctx: &PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> Scored {
        let Some(available) = ctx.available(&unit.id, &unit.allocatable) else {
            return Scored::default();
        };

        let mut weighted_sum = 0.0;
        let mut weighted_count = 0.0;
        for (name, requested) in instance.resources.iter() {
            // Heterogeneous (VENDOR/PRODUCT/KIND) and vector resources are
            // DefaultHeterogeneousScorer's concern.
            if name.matches('/').count() == 2 {
                continue;
            }
            let Resource::Scalar(requested_scalar) = requested else {
                continue;
            };
            let Some(Resource::Scalar(capacity_scalar)) = unit.capacity.get(name) else {
                continue;
            };
            if capacity_scalar.thousandths() <= 0 {
                continue;
            }
            let Some(Resource::Scalar(avail_scalar)) = available.get(name) else {
                continue;
            };
            let remaining_after = (avail_scalar.thousandths() - requested_scalar.thousandths()).max(0) as f64;
            let fraction_free = remaining_after / capacity_scalar.thousandths() as f64;
            weighted_sum += fraction_free.clamp(0.0, 1.0);
            weighted_count += 1.0;
        }

        let score = if weighted_count > 0.0 {
            (weighted_sum / weighted_count) * 100.0
        } else {
            // No comparable scalar resource was requested; treat as
            // neutrally eligible rather than penalizing the unit.
            50.0
        };

        Scored {
            score,
            allocated_vectors: resource_algebra::Resources::new(),
            real_ids: Vec::new(),
            hetero_product_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_algebra::{Resources, ScalarResource};
    use scheduler_shared::UnitId;

    fn resources(cpu_units: i64, mem_units: i64) -> Resources {
        let mut r = Resources::new();
        r.insert("cpu", Resource::Scalar(ScalarResource::from_units(cpu_units)));
        r.insert("memory", Resource::Scalar(ScalarResource::from_units(mem_units)));
        r
    }

    fn sample_unit(cpu: i64, mem: i64) -> ResourceUnit {
        let mut unit = ResourceUnit::new(UnitId::random(), "node", "default");
        unit.capacity = resources(cpu, mem);
        unit.allocatable = resources(cpu, mem);
        unit
    }

    fn sample_instance(resources: Resources) -> InstanceInfo {
        InstanceInfo {
            instance_id: scheduler_shared::InstanceId::random(),
            request_id: scheduler_shared::RequestId::random(),
            unit_id: UnitId::random(),
            scheduler_chain: Vec::new(),
            resources,
            actual_use: Resources::new(),
            labels: Default::default(),
            schedule_option: resource_view::ScheduleOption::default(),
            group_id: None,
            tenant_id: None,
            function_proxy_id: None,
        }
    }

    #[test]
    fn emptier_unit_scores_higher_than_nearly_full_one() {
        let scorer = DefaultScorer::new();
        let ctx = PreAllocatedContext::new();
        let instance = sample_instance(resources(1, 1024));

        let roomy = sample_unit(16, 32768);
        let tight = sample_unit(2, 2048);

        let roomy_score = scorer.score(&ctx, &instance, &roomy);
        let tight_score = scorer.score(&ctx, &instance, &tight);
        assert!(roomy_score.score > tight_score.score);
    }
}
