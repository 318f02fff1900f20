//! `DefaultHeterogeneousFilter`: admission filter for heterogeneous
//! (accelerator) resources named `VENDOR/PRODUCT/KIND` (§4.3), grounded
//! on `default_heterogeneous_filter.cpp`.
//!
//! The request-side resource name carries the full `VENDOR/PRODUCT/KIND`
//! triple with a scalar value; the unit's `allocatable`/`capacity` carry
//! one vector resource per `VENDOR/PRODUCT` card type, whose categories
//! are the `KIND`s and whose per-category map is `device-uuid -> slots`.

use crate::context::PreAllocatedContext;
use crate::error::FrameworkError;
use crate::filter::{Filter, Filtered};
use resource_algebra::{Resource, Resources};
use resource_view::{InstanceInfo, ResourceUnit, ResourceView};

const CARD_NUM_KIND: &str = "count";
const EPSILON: f64 = 1e-8;
const NUM_THRESHOLD: f64 = 1.0 - EPSILON;
const MIN_NUM_THRESHOLD: f64 = 0.0001;

fn card_type_and_kind(resource_name: &str) -> Option<(&str, &str)> {
    let idx = resource_name.rfind('/')?;
    if resource_name[..idx].matches('/').count() != 1 {
        return None;
    }
    Some((&resource_name[..idx], &resource_name[idx + 1..]))
}

fn card_resource_available(available: &Resources, card_type: &str, kind: &str, required: f64) -> bool {
    let Some(Resource::Vector(vector)) = available.get(card_type) else {
        return false;
    };
    let Some(devices) = vector.categories().get(kind) else {
        return false;
    };
    devices
        .values()
        .flatten()
        .any(|value| *value + EPSILON >= required)
}

fn count_available_cards(available: &Resources, capacity: &Resources, card_type: &str, kind: &str, req_fraction: f64) -> i64 {
    let (Some(Resource::Vector(avail_vec)), Some(Resource::Vector(cap_vec))) =
        (available.get(card_type), capacity.get(card_type))
    else {
        return 0;
    };
    let (Some(avail_devices), Some(cap_devices)) = (avail_vec.categories().get(kind), cap_vec.categories().get(kind))
    else {
        return 0;
    };

    let mut count = 0;
    for (uuid, avail_slots) in avail_devices {
        let Some(cap_slots) = cap_devices.get(uuid) else {
            continue;
        };
        if cap_slots.len() != avail_slots.len() {
            continue;
        }
        for (cap, avail) in cap_slots.iter().zip(avail_slots.iter()) {
            let required = cap * req_fraction;
            if *cap > EPSILON && *avail + EPSILON > required {
                count += 1;
            }
        }
    }
    count
}

pub struct DefaultHeterogeneousFilter;

impl DefaultHeterogeneousFilter {
    pub fn new() -> Self {
        Self
    }

    fn has_heterogeneous_resource(instance: &InstanceInfo) -> bool {
        instance
            .resources
            .iter()
            .any(|(name, _)| card_type_and_kind(name).is_some())
    }

    fn check_card_resources(&self, instance: &InstanceInfo, available: &Resources) -> Result<(), FrameworkError> {
        for (name, resource) in instance.resources.iter() {
            let Some((card_type, kind)) = card_type_and_kind(name) else {
                continue;
            };
            if kind == "latency" || kind == CARD_NUM_KIND {
                continue;
            }
            let Resource::Scalar(requested) = resource else {
                continue;
            };
            if requested.thousandths() == 0 {
                return Err(FrameworkError::HeterogeneousScheduleFailed {
                    reason: format!("invalid {kind} value"),
                });
            }
            if !card_resource_available(available, card_type, kind, requested.as_units_f64()) {
                return Err(FrameworkError::HeterogeneousScheduleFailed {
                    reason: format!("{kind}: not enough"),
                });
            }
        }
        Ok(())
    }

    fn check_card_num(
        &self,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
        available: &Resources,
    ) -> Result<(), FrameworkError> {
        let Some((name, resource)) = instance
            .resources
            .iter()
            .find(|(name, _)| card_type_and_kind(name).map(|(_, kind)| kind == CARD_NUM_KIND).unwrap_or(false))
        else {
            return Ok(());
        };
        let Resource::Scalar(requested) = resource else {
            return Ok(());
        };
        let requested_value = requested.as_units_f64();
        if requested_value < MIN_NUM_THRESHOLD
            || (requested_value > NUM_THRESHOLD && (requested_value - requested_value.round()).abs() > EPSILON)
        {
            return Err(FrameworkError::HeterogeneousScheduleFailed {
                reason: format!(
                    "specified quantity {requested_value} must be whole numbers or at least {MIN_NUM_THRESHOLD}"
                ),
            });
        }
        let required_num = requested_value.ceil() as i64;
        let (card_type, _) = card_type_and_kind(name).expect("matched above");
        let count = count_available_cards(
            available,
            &unit.capacity,
            card_type,
            "memory",
            if requested_value < NUM_THRESHOLD { requested_value } else { 1.0 },
        );
        if count >= required_num {
            Ok(())
        } else {
            Err(FrameworkError::HeterogeneousScheduleFailed {
                reason: "card count: not enough".to_string(),
            })
        }
    }
}

impl Default for DefaultHeterogeneousFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for DefaultHeterogeneousFilter {
    fn name(&self) -> &str {
        "DefaultHeterogeneousFilter"
    }

    fn filter(
        &self,
        ctx: &PreAllocatedContext,
        _view: &ResourceView,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Filtered {
        if !Self::has_heterogeneous_resource(instance) {
            return Filtered::ok(-1);
        }
        let Some(available) = ctx.available(&unit.id, &unit.allocatable) else {
            return Filtered::rejected(
                FrameworkError::InvalidAvailable {
                    unit_id: unit.id.to_string(),
                },
                "invalid resource",
            );
        };
        if let Err(err) = self.check_card_resources(instance, &available) {
            return Filtered::rejected(err.clone(), err.to_string());
        }
        if let Err(err) = self.check_card_num(instance, unit, &available) {
            return Filtered::rejected(err.clone(), err.to_string());
        }
        Filtered::ok(1)
    }
}
