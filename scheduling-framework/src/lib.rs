//! Scheduling Framework: the Prefilter → Filter → Score plugin pipeline
//! that picks a `ResourceUnit` for one instance request (§4.3).
//!
//! This crate only runs the pipeline and produces a ranked placement; the
//! reserve/bind/commit protocol that turns a placement into an actual
//! allocation lives in `instance-control` and `group-control`, talking to
//! the local proxy through `underlayer`.

pub mod affinity;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod plugins;
pub mod score;

pub use config::FrameworkConfig;
pub use context::PreAllocatedContext;
pub use error::{FrameworkError, Result};
pub use filter::{Filter, Filtered};
pub use score::{Score, Scored};

use resource_algebra::Resources;
use resource_view::{InstanceInfo, ResourceUnit, ResourceView};
use scheduler_shared::UnitId;
use std::collections::BTreeMap;

/// Request-global state computed once per decision, ahead of the
/// per-unit filter/score loop (§4.3 "Prefilter").
#[derive(Debug, Clone, Default)]
pub struct ScheduleContext {
    pub required_affinity_label: Option<String>,
}

impl ScheduleContext {
    pub fn prefilter(instance: &InstanceInfo) -> Self {
        Self {
            required_affinity_label: instance.schedule_option.affinity.clone(),
        }
    }
}

/// The outcome of scoring one eligible unit: where to place the instance
/// and what exact resource slice (including any heterogeneous device
/// slots) to subtract.
#[derive(Debug, Clone)]
pub struct PlacementCandidate {
    pub unit_id: UnitId,
    pub score: f64,
    pub available_for_request: i64,
    pub allocated_vectors: Resources,
    pub real_ids: Vec<String>,
    pub hetero_product_name: Option<String>,
}

fn prefers(candidate: &PlacementCandidate, incumbent: &PlacementCandidate) -> bool {
    if candidate.score != incumbent.score {
        candidate.score > incumbent.score
    } else {
        candidate.unit_id < incumbent.unit_id
    }
}

/// Holds the registered filter/score plugins and runs the pipeline.
pub struct SchedulingPipeline {
    filters: Vec<Box<dyn Filter>>,
    scorers: BTreeMap<String, Box<dyn Score>>,
    config: FrameworkConfig,
}

impl SchedulingPipeline {
    /// Wires up the built-in plugins named in `config`. Unknown plugin
    /// names are ignored rather than treated as a hard error, so a config
    /// that references a not-yet-registered custom plugin degrades
    /// gracefully instead of failing every schedule decision.
    pub fn with_default_plugins(config: FrameworkConfig) -> Self {
        use plugins::{DefaultFilter, DefaultHeterogeneousFilter, DefaultHeterogeneousScorer, DefaultScorer};

        let mut filters: Vec<Box<dyn Filter>> = Vec::new();
        for name in &config.filter_plugins {
            match name.as_str() {
                "DefaultFilter" => filters.push(Box::new(DefaultFilter::new())),
                "DefaultHeterogeneousFilter" => filters.push(Box::new(DefaultHeterogeneousFilter::new())),
                "LabelAffinityFilter" => {
                    let plugin = if config.strict_label_affinity {
                        affinity::LabelAffinityFilter::strict()
                    } else {
                        affinity::LabelAffinityFilter::relaxed()
                    };
                    filters.push(Box::new(plugin));
                }
                _ => {}
            }
        }

        let mut scorers: BTreeMap<String, Box<dyn Score>> = BTreeMap::new();
        for name in &config.score_plugins {
            let boxed: Option<Box<dyn Score>> = match name.as_str() {
                "DefaultScorer" => Some(Box::new(DefaultScorer::new())),
                "DefaultHeterogeneousScorer" => Some(Box::new(DefaultHeterogeneousScorer::new())),
                "LabelAffinityScorePlugin" => Some(Box::new(affinity::LabelAffinityScorePlugin::new())),
                _ => None,
            };
            if let Some(boxed) = boxed {
                scorers.insert(name.clone(), boxed);
            }
        }

        Self {
            filters,
            scorers,
            config,
        }
    }

    /// Runs filter then score over every candidate unit and returns the
    /// highest-scoring eligible one, ties broken by unit id (§4.3).
    /// `available_for_request` on the winner is the smallest
    /// `available_for_request` reported by any filter, for use by range
    /// scheduling in `group-control`.
    pub fn schedule<'a>(
        &self,
        ctx: &PreAllocatedContext,
        view: &ResourceView,
        instance: &InstanceInfo,
        candidate_units: impl IntoIterator<Item = &'a ResourceUnit>,
    ) -> Result<PlacementCandidate> {
        let mut best: Option<PlacementCandidate> = None;

        for unit in candidate_units {
            let Some(available_for_request) = self.run_filters(ctx, view, instance, unit) else {
                continue;
            };
            let Some(scored) = self.run_scorers(ctx, instance, unit) else {
                continue;
            };

            let candidate = PlacementCandidate {
                unit_id: unit.id,
                score: scored.score,
                available_for_request,
                allocated_vectors: scored.allocated_vectors,
                real_ids: scored.real_ids,
                hetero_product_name: scored.hetero_product_name,
            };
            best = Some(match best {
                None => candidate,
                Some(incumbent) => {
                    if prefers(&candidate, &incumbent) {
                        candidate
                    } else {
                        incumbent
                    }
                }
            });
        }

        best.ok_or_else(|| FrameworkError::ResourceNotEnough {
            resource: "no eligible unit found for this request".to_string(),
        })
    }

    /// Returns `None` if the unit is rejected by any filter; otherwise the
    /// minimum `available_for_request` across all filters that reported one.
    fn run_filters(
        &self,
        ctx: &PreAllocatedContext,
        view: &ResourceView,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Option<i64> {
        let mut available_for_request = i64::MAX;
        for filter in &self.filters {
            let result = filter.filter(ctx, view, instance, unit);
            if !result.is_ok() {
                return None;
            }
            if result.available_for_request >= 0 {
                available_for_request = available_for_request.min(result.available_for_request);
            }
        }
        Some(if available_for_request == i64::MAX {
            1
        } else {
            available_for_request
        })
    }

    /// Weighted-average score across registered plugins; `None` if any
    /// plugin returns a negative score (§4.3: "units with score < 0 are
    /// dropped").
    fn run_scorers(&self, ctx: &PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> Option<Scored> {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut allocated_vectors = Resources::new();
        let mut real_ids = Vec::new();
        let mut hetero_product_name = None;

        for (name, scorer) in &self.scorers {
            let scored = scorer.score(ctx, instance, unit);
            if scored.score < 0.0 {
                return None;
            }
            let weight = self.config.weight_of(name);
            weighted_sum += scored.score * weight;
            weight_total += weight;
            if !scored.allocated_vectors.is_empty() {
                allocated_vectors = scored.allocated_vectors;
            }
            if !scored.real_ids.is_empty() {
                real_ids = scored.real_ids;
            }
            if scored.hetero_product_name.is_some() {
                hetero_product_name = scored.hetero_product_name;
            }
        }

        let score = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
        Some(Scored {
            score,
            allocated_vectors,
            real_ids,
            hetero_product_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_algebra::{Resource, ScalarResource};
    use resource_view::ScheduleOption;
    use scheduler_shared::{InstanceId, RequestId};

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
            instance_id: InstanceId::random(),
            request_id: RequestId::random(),
            unit_id: UnitId::random(),
            scheduler_chain: Vec::new(),
            resources,
            actual_use: Resources::new(),
            labels: Default::default(),
            schedule_option: ScheduleOption::default(),
            group_id: None,
            tenant_id: None,
            function_proxy_id: None,
        }
    }

    #[test]
    fn picks_the_roomier_of_two_eligible_units() {
        let pipeline = SchedulingPipeline::with_default_plugins(FrameworkConfig::default());
        let ctx = PreAllocatedContext::new();
        let view = ResourceView::new(UnitId::random(), Default::default());
        let instance = sample_instance(resources(1, 1024));

        let roomy = sample_unit(16, 32768);
        let tight = sample_unit(2, 2048);
        let roomy_id = roomy.id;

        let winner = pipeline
            .schedule(&ctx, &view, &instance, [&roomy, &tight])
            .expect("an eligible unit");
        assert_eq!(winner.unit_id, roomy_id);
    }

    #[test]
    fn no_eligible_unit_surfaces_resource_not_enough() {
        let pipeline = SchedulingPipeline::with_default_plugins(FrameworkConfig::default());
        let ctx = PreAllocatedContext::new();
        let view = ResourceView::new(UnitId::random(), Default::default());
        let instance = sample_instance(resources(64, 1024));
        let tiny = sample_unit(2, 2048);

        let result = pipeline.schedule(&ctx, &view, &instance, [&tiny]);
        assert!(matches!(result, Err(FrameworkError::ResourceNotEnough { .. })));
    }
}
