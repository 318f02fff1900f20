//! `DefaultHeterogeneousScorer`: per-device scoring and allocation for
//! heterogeneous (accelerator) resources (§4.3), grounded on
//! `default_heterogeneous_scorer.cpp`'s HBM/latency/stream composite but
//! expressed against this crate's `VectorResource` shape rather than a
//! literal port of the protobuf-walking original.
//!
//! Per spec.md §4.3: "hetero score per device is `((cap_hbm - req)/cap_hbm
//! + latency_normalized + stream_available/stream_max) / 3`". A card-count
//! request of value `r < 1` places on a single device consuming `r` of its
//! capacity; an integer `r >= 1` distributes across `r` devices at full
//! capacity each. Selected device ids are recorded ascending in `real_ids`
//! (§8 scenario 5).

use crate::context::PreAllocatedContext;
use crate::score::{Score, Scored};
use resource_algebra::{Resource, Resources, VectorResource};
use resource_view::{InstanceInfo, ResourceUnit};
use std::collections::BTreeMap;

const HBM_KEY: &str = "memory";
const LATENCY_KEY: &str = "latency";
const STREAM_KEY: &str = "stream";
const COUNT_KIND: &str = "count";
const EPSILON: f64 = 1e-8;
const NUM_THRESHOLD: f64 = 1.0 - EPSILON;

fn card_type_and_kind(resource_name: &str) -> Option<(&str, &str)> {
    let idx = resource_name.rfind('/')?;
    if resource_name[..idx].matches('/').count() != 1 {
        return None;
    }
    Some((&resource_name[..idx], &resource_name[idx + 1..]))
}

/// Flattens a vector category's per-uuid slot arrays into one
/// ascending-index-order sequence of `(uuid, slot_index, value)`, matching
/// spec.md scenario 5's single flat per-device array.
fn flatten(category: &BTreeMap<String, Vec<f64>>) -> Vec<(String, usize, f64)> {
    let mut out = Vec::new();
    for (uuid, slots) in category {
        for (i, v) in slots.iter().enumerate() {
            out.push((uuid.clone(), i, *v));
        }
    }
    out
}

pub struct DefaultHeterogeneousScorer;

impl DefaultHeterogeneousScorer {
    pub fn new() -> Self {
        Self
    }

    fn has_heterogeneous_resource(instance: &InstanceInfo) -> bool {
        instance
            .resources
            .iter()
            .any(|(name, _)| card_type_and_kind(name).is_some())
    }

    fn score_devices(
        card_type: &str,
        available: &Resources,
        req_hbm: f64,
        req_stream: f64,
    ) -> Vec<(String, usize, f64)> {
        let Some(Resource::Vector(vector)) = available.get(card_type) else {
            return Vec::new();
        };
        let hbm = vector.categories().get(HBM_KEY).map(flatten).unwrap_or_default();
        let latency = vector.categories().get(LATENCY_KEY).map(flatten).unwrap_or_default();
        let stream = vector.categories().get(STREAM_KEY).map(flatten).unwrap_or_default();

        let max_latency = latency
            .iter()
            .map(|(_, _, v)| *v)
            .fold(f64::MIN, f64::max)
            .max(EPSILON);
        let max_stream = stream
            .iter()
            .map(|(_, _, v)| *v)
            .fold(f64::MIN, f64::max)
            .max(EPSILON);

        let mut scored = Vec::with_capacity(hbm.len());
        for (idx, (uuid, slot, cap_hbm)) in hbm.iter().enumerate() {
            if *cap_hbm <= EPSILON || *cap_hbm + EPSILON < req_hbm {
                continue;
            }
            let hbm_score = ((cap_hbm - req_hbm) / cap_hbm).clamp(0.0, 1.0);

            let latency_score = latency
                .get(idx)
                .map(|(_, _, lat)| ((max_latency - (-lat)) / (max_latency + EPSILON)).clamp(0.0, 1.0))
                .unwrap_or(1.0);

            let stream_score = stream
                .get(idx)
                .map(|(_, _, avail)| {
                    if *avail + EPSILON < req_stream {
                        None
                    } else {
                        Some((avail / max_stream).clamp(0.0, 1.0))
                    }
                })
                .unwrap_or(Some(1.0));
            let Some(stream_score) = stream_score else {
                continue;
            };

            let final_score = (hbm_score + latency_score + stream_score) / 3.0 * 100.0;
            scored.push((uuid.clone(), *slot, final_score));
        }
        scored
    }
}

impl Default for DefaultHeterogeneousScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Score for DefaultHeterogeneousScorer {
    fn name(&self) -> &str {
        "DefaultHeterogeneousScorer"
    }

    fn score(&self, ctx: &PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> Scored {
        if !Self::has_heterogeneous_resource(instance) {
            return Scored::default();
        }
        let Some(available) = ctx.available(&unit.id, &unit.allocatable) else {
            return Scored::default();
        };

        let mut card_type = None;
        let mut req_hbm = 0.0;
        let mut req_stream = 0.0;
        let mut req_count = 1.0;
        for (name, resource) in instance.resources.iter() {
            let Some((ct, kind)) = card_type_and_kind(name) else {
                continue;
            };
            let Resource::Scalar(value) = resource else {
                continue;
            };
            card_type = Some(ct.to_string());
            match kind {
                HBM_KEY => req_hbm = value.as_units_f64(),
                STREAM_KEY => req_stream = value.as_units_f64(),
                COUNT_KIND => req_count = value.as_units_f64(),
                _ => {}
            }
        }
        let Some(card_type) = card_type else {
            return Scored::default();
        };

        let mut candidates = Self::score_devices(&card_type, &available, req_hbm, req_stream);
        if candidates.is_empty() {
            return Scored {
                score: -1.0,
                ..Default::default()
            };
        }
        // Highest score first; ties broken by ascending slot index for
        // determinism.
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap().then(a.1.cmp(&b.1)));

        let (devices_needed, per_device_hbm) = if req_count < NUM_THRESHOLD {
            (1usize, req_hbm.max(req_count))
        } else {
            (req_count.ceil().max(1.0) as usize, req_hbm.max(1.0))
        };
        if candidates.len() < devices_needed {
            return Scored {
                score: -1.0,
                ..Default::default()
            };
        }

        let selected = &candidates[..devices_needed];
        let avg_score = selected.iter().map(|(_, _, s)| *s).sum::<f64>() / devices_needed as f64;

        let mut real_ids: Vec<usize> = selected.iter().map(|(_, slot, _)| *slot).collect();
        real_ids.sort_unstable();

        let mut consumed: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        if let Some(Resource::Vector(vector)) = available.get(&card_type) {
            if let Some(hbm_category) = vector.categories().get(HBM_KEY) {
                for (uuid, slots) in hbm_category {
                    consumed.insert(uuid.clone(), vec![0.0; slots.len()]);
                }
            }
        }
        for (uuid, slot, _) in selected {
            if let Some(slots) = consumed.get_mut(uuid) {
                if *slot < slots.len() {
                    slots[*slot] = per_device_hbm;
                }
            }
        }

        let mut allocated_vectors = Resources::new();
        allocated_vectors.insert(
            card_type.clone(),
            Resource::Vector(VectorResource::new().with_category(HBM_KEY, consumed)),
        );

        Scored {
            score: avg_score,
            allocated_vectors,
            real_ids: real_ids.into_iter().map(|i| i.to_string()).collect(),
            hetero_product_name: Some(card_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_algebra::ScalarResource;
    use scheduler_shared::UnitId;
    use std::collections::BTreeMap as Map;

    fn hetero_unit(hbm_slots: Vec<f64>) -> ResourceUnit {
        let mut unit = ResourceUnit::new(UnitId::random(), "npu-node", "default");
        let mut hbm = Map::new();
        hbm.insert("gpu-group".to_string(), hbm_slots);
        let vector = VectorResource::new().with_category(HBM_KEY, hbm);
        let mut resources = Resources::new();
        resources.insert("vendor/ascend910b", Resource::Vector(vector));
        unit.capacity = resources.clone();
        unit.allocatable = resources;
        unit
    }

    fn hetero_instance(count: f64) -> InstanceInfo {
        let mut resources = Resources::new();
        resources.insert(
            "vendor/ascend910b/count",
            Resource::Scalar(ScalarResource::from_units(count as i64)),
        );
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
    fn selects_highest_scoring_nonzero_devices_ascending() {
        let scorer = DefaultHeterogeneousScorer::new();
        let ctx = PreAllocatedContext::new();
        // Slot 3, 6 and 7 are empty (0.0) and must never be selected; the
        // other five all have spare capacity, so a count=6 request cannot
        // be satisfied and the unit is scored ineligible.
        let unit = hetero_unit(vec![15.0, 20.0, 40.0, 0.0, 20.0, 30.0, 0.0, 0.0]);
        let instance = hetero_instance(6.0);

        let scored = scorer.score(&ctx, &instance, &unit);
        assert_eq!(scored.score, -1.0);
        assert!(scored.real_ids.is_empty());
    }

    #[test]
    fn selects_requested_count_of_nonzero_devices_ascending() {
        let scorer = DefaultHeterogeneousScorer::new();
        let ctx = PreAllocatedContext::new();
        let unit = hetero_unit(vec![15.0, 20.0, 40.0, 0.0, 20.0, 30.0, 0.0, 0.0]);
        let instance = hetero_instance(5.0);

        let scored = scorer.score(&ctx, &instance, &unit);
        assert!(scored.score >= 0.0);
        assert_eq!(scored.real_ids.len(), 5);
        let mut ids: Vec<usize> = scored.real_ids.iter().map(|s| s.parse().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 4, 5]);
    }

    #[test]
    fn non_heterogeneous_instance_is_neutral() {
        let scorer = DefaultHeterogeneousScorer::new();
        let ctx = PreAllocatedContext::new();
        let unit = hetero_unit(vec![15.0]);
        let mut instance = hetero_instance(1.0);
        instance.resources = Resources::new();
        let mut r = Resources::new();
        r.insert("cpu", Resource::Scalar(ScalarResource::from_units(1)));
        instance.resources = r;

        let scored = scorer.score(&ctx, &instance, &unit);
        assert_eq!(scored.score, 0.0);
    }
}
