//! `DefaultFilter`: the CPU/memory admission filter every request runs
//! through (§4.3), grounded on `default_filter.cpp`'s `MonopolyFilter` /
//! `ResourceFilter` split.

use crate::context::PreAllocatedContext;
use crate::error::FrameworkError;
use crate::filter::{Filter, Filtered};
use resource_algebra::Resource;
use resource_view::{mem_cpu_shape, InstanceInfo, MemKey, RatioKey, ResourceUnit, ResourceView};

const EPSILON: f64 = 1e-6;

pub struct DefaultFilter;

impl DefaultFilter {
    pub fn new() -> Self {
        Self
    }

    fn scalar_value(unit_resources: &resource_algebra::Resources, name: &str) -> Option<f64> {
        match unit_resources.get(name)? {
            Resource::Scalar(s) => Some(s.as_units_f64()),
            Resource::Vector(_) => None,
        }
    }

    fn monopoly_filter(
        &self,
        ctx: &PreAllocatedContext,
        view: &ResourceView,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Result<(), FrameworkError> {
        let instance_mem = Self::scalar_value(&instance.resources, "memory").unwrap_or(0.0);
        let instance_cpu = Self::scalar_value(&instance.resources, "cpu").unwrap_or(0.0);

        if ctx
            .pre_allocated_selected_function_agent_set
            .contains(&unit.id)
        {
            return Err(FrameworkError::ResourceNotEnough {
                resource: format!("({instance_cpu}, {instance_mem}) already allocated to other"),
            });
        }

        let fragment_mem = Self::scalar_value(&unit.allocatable, "memory").unwrap_or(0.0);
        let fragment_cpu = Self::scalar_value(&unit.allocatable, "cpu").unwrap_or(0.0);

        if (instance_mem - fragment_mem).abs() > EPSILON || (instance_cpu - fragment_cpu).abs() > EPSILON {
            return Err(FrameworkError::ResourceNotEnough {
                resource: format!("({instance_cpu}, {instance_mem}) don't match precisely"),
            });
        }
        if instance_cpu.abs() < EPSILON {
            return Err(FrameworkError::ResourceNotFound {
                resource: format!("invalid cpu: {instance_cpu}"),
            });
        }

        let (ratio, mem_key): (RatioKey, MemKey) =
            mem_cpu_shape(instance_mem as i64, (instance_cpu * 1000.0).round() as i64);
        let bucket = view.bucket(ratio, mem_key).ok_or_else(|| FrameworkError::ResourceNotEnough {
            resource: format!("({instance_cpu}, {instance_mem}) not found"),
        })?;
        if bucket.total.monopoly_num == 0 {
            return Err(FrameworkError::ResourceNotEnough {
                resource: format!("({instance_cpu}, {instance_mem}) not enough"),
            });
        }
        Ok(())
    }

    fn resource_filter(
        &self,
        ctx: &PreAllocatedContext,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Filtered {
        let available = match ctx.available(&unit.id, &unit.allocatable) {
            Some(available) => available,
            None => {
                return Filtered::rejected(
                    FrameworkError::InvalidAvailable {
                        unit_id: unit.id.to_string(),
                    },
                    "no resources available",
                )
            }
        };

        let mut max_allocatable = i64::MAX;
        for (name, requested) in instance.resources.iter() {
            // Heterogeneous resource names are VENDOR/PRODUCT/KIND; those
            // are the heterogeneous filter's concern, not this one.
            if name.matches('/').count() == 2 {
                continue;
            }
            let requested_scalar = match requested {
                Resource::Scalar(s) => s,
                Resource::Vector(_) => continue,
            };
            if requested_scalar.thousandths() == 0 {
                continue;
            }

            let Some(capacity) = unit.capacity.get(name) else {
                return Filtered::rejected(
                    FrameworkError::ResourceNotFound {
                        resource: name.clone(),
                    },
                    format!("{name}: not found"),
                );
            };
            let Resource::Scalar(capacity_scalar) = capacity else {
                continue;
            };
            if requested_scalar.thousandths() > capacity_scalar.thousandths() {
                return Filtered::rejected(
                    FrameworkError::OutOfCapacity {
                        resource: name.clone(),
                    },
                    format!("{name}: out of capacity"),
                );
            }

            let Some(Resource::Scalar(avail_scalar)) = available.get(name) else {
                return Filtered::rejected(
                    FrameworkError::ResourceNotFound {
                        resource: name.clone(),
                    },
                    format!("{name}: not found"),
                );
            };
            if requested_scalar.thousandths() > avail_scalar.thousandths() {
                return Filtered::rejected(
                    FrameworkError::ResourceNotEnough {
                        resource: name.clone(),
                    },
                    format!("{name}: not enough"),
                );
            }

            let can_allocate = avail_scalar.thousandths() / requested_scalar.thousandths();
            max_allocatable = max_allocatable.min(can_allocate);
        }

        if max_allocatable == i64::MAX || max_allocatable <= 0 {
            max_allocatable = 1;
        }
        Filtered::ok(max_allocatable)
    }
}

impl Default for DefaultFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for DefaultFilter {
    fn name(&self) -> &str {
        "DefaultFilter"
    }

    fn filter(
        &self,
        ctx: &PreAllocatedContext,
        view: &ResourceView,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Filtered {
        if instance.schedule_option.is_monopoly() {
            return match self.monopoly_filter(ctx, view, instance, unit) {
                Ok(()) => Filtered::ok(1),
                Err(err) => Filtered::rejected(err.clone(), err.to_string()),
            };
        }
        self.resource_filter(ctx, instance, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_algebra::{Resources, ScalarResource};
    use scheduler_shared::UnitId;

    fn resources(cpu_units: i64, mem_units: i64) -> resource_algebra::Resources {
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

    fn sample_instance(resources: resource_algebra::Resources) -> InstanceInfo {
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
    fn shared_request_within_capacity_passes() {
        let filter = DefaultFilter::new();
        let ctx = PreAllocatedContext::new();
        let view = ResourceView::new(UnitId::random(), Default::default());
        let unit = sample_unit(4, 8192);
        let instance = sample_instance(resources(1, 1024));
        let result = filter.filter(&ctx, &view, &instance, &unit);
        assert!(result.is_ok());
        assert!(result.available_for_request >= 1);
    }

    #[test]
    fn request_over_capacity_is_rejected() {
        let filter = DefaultFilter::new();
        let ctx = PreAllocatedContext::new();
        let view = ResourceView::new(UnitId::random(), Default::default());
        let unit = sample_unit(4, 8192);
        let instance = sample_instance(resources(8, 1024));
        let result = filter.filter(&ctx, &view, &instance, &unit);
        assert!(!result.is_ok());
    }
}
