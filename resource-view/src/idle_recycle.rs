//! Idle-to-recycle timer policy (§4.2).
//!
//! A unit carries a label `"yr-idle-to-recycle"` whose value is
//! `"unlimited"` (never auto-recycle), `"0"` (ineligible) or a positive
//! integer `N` (recycle after `N` seconds idle). An invalid or absent
//! value falls back to a tenant-default timer when tenant affinity is
//! enabled and the unit has ever hosted a tenant-tagged instance;
//! otherwise it is treated as `0` (no recycle).

use resource_algebra::LabelCounter;
use std::time::Duration;

pub const IDLE_TO_RECYCLE_LABEL: &str = "yr-idle-to-recycle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleToRecyclePolicy {
    Unlimited,
    Ineligible,
    RecycleAfter(Duration),
}

impl IdleToRecyclePolicy {
    pub fn deadline_seconds(&self) -> Option<u64> {
        match self {
            IdleToRecyclePolicy::RecycleAfter(d) => Some(d.as_secs()),
            _ => None,
        }
    }
}

/// Resolves the idle-to-recycle policy for a unit from its node labels,
/// falling back to `tenant_default` when the label is absent/invalid and
/// `has_hosted_tenant` is true.
pub fn resolve_policy(
    node_labels: &LabelCounter,
    has_hosted_tenant: bool,
    tenant_affinity_enabled: bool,
    tenant_default: Duration,
) -> IdleToRecyclePolicy {
    if let Some(values) = node_labels.values_for(IDLE_TO_RECYCLE_LABEL) {
        if let Some((value, _count)) = values.iter().next() {
            return parse_value(value, has_hosted_tenant, tenant_affinity_enabled, tenant_default);
        }
    }
    parse_value("", has_hosted_tenant, tenant_affinity_enabled, tenant_default)
}

fn parse_value(
    value: &str,
    has_hosted_tenant: bool,
    tenant_affinity_enabled: bool,
    tenant_default: Duration,
) -> IdleToRecyclePolicy {
    match value {
        "unlimited" => IdleToRecyclePolicy::Unlimited,
        "0" | "" => fallback(has_hosted_tenant, tenant_affinity_enabled, tenant_default),
        other => match other.parse::<i64>() {
            Ok(n) if n > 0 => IdleToRecyclePolicy::RecycleAfter(Duration::from_secs(n as u64)),
            // An invalid parsed value is treated as 0 (no recycle).
            _ => fallback(has_hosted_tenant, tenant_affinity_enabled, tenant_default),
        },
    }
}

fn fallback(
    has_hosted_tenant: bool,
    tenant_affinity_enabled: bool,
    tenant_default: Duration,
) -> IdleToRecyclePolicy {
    if tenant_affinity_enabled && has_hosted_tenant && !tenant_default.is_zero() {
        IdleToRecyclePolicy::RecycleAfter(tenant_default)
    } else {
        IdleToRecyclePolicy::Ineligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_with(value: &str) -> LabelCounter {
        LabelCounter::from_kv(&format!("{}:{}", IDLE_TO_RECYCLE_LABEL, value))
    }

    #[test]
    fn unlimited_label_never_recycles() {
        let labels = labels_with("unlimited");
        let policy = resolve_policy(&labels, false, false, Duration::from_secs(0));
        assert_eq!(policy, IdleToRecyclePolicy::Unlimited);
    }

    #[test]
    fn zero_label_is_ineligible() {
        let labels = labels_with("0");
        let policy = resolve_policy(&labels, false, false, Duration::from_secs(0));
        assert_eq!(policy, IdleToRecyclePolicy::Ineligible);
    }

    #[test]
    fn positive_integer_arms_a_timer() {
        let labels = labels_with("120");
        let policy = resolve_policy(&labels, false, false, Duration::from_secs(0));
        assert_eq!(policy, IdleToRecyclePolicy::RecycleAfter(Duration::from_secs(120)));
    }

    #[test]
    fn invalid_value_with_tenant_history_falls_back_to_tenant_default() {
        let labels = labels_with("not-a-number");
        let policy = resolve_policy(&labels, true, true, Duration::from_secs(600));
        assert_eq!(policy, IdleToRecyclePolicy::RecycleAfter(Duration::from_secs(600)));
    }

    #[test]
    fn invalid_value_without_tenant_history_is_ineligible() {
        let labels = labels_with("not-a-number");
        let policy = resolve_policy(&labels, false, true, Duration::from_secs(600));
        assert_eq!(policy, IdleToRecyclePolicy::Ineligible);
    }

    #[test]
    fn absent_label_without_tenant_affinity_is_ineligible() {
        let labels = LabelCounter::new();
        let policy = resolve_policy(&labels, false, false, Duration::from_secs(600));
        assert_eq!(policy, IdleToRecyclePolicy::Ineligible);
    }
}
