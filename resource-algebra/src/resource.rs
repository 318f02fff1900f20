//! `Resource`/`Resources` types and their arithmetic (§3, §4.1).

use crate::error::AlgebraError;
use scheduler_shared::RESOURCES_EPSILON;
use scheduler_shared::SCALAR_FIXED_POINT_SCALE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Integer-valued quantity (CPU thousandths, memory MB). Stored already
/// scaled by `SCALAR_FIXED_POINT_SCALE` so addition/subtraction never
/// drifts through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarResource {
    thousandths: i64,
}

impl ScalarResource {
    /// Builds a scalar from a whole-unit value (e.g. `2` CPUs, `1024` MB).
    pub fn from_units(units: i64) -> Self {
        Self {
            thousandths: units * SCALAR_FIXED_POINT_SCALE,
        }
    }

    /// Builds a scalar directly from its already-scaled thousandths value.
    pub fn from_thousandths(thousandths: i64) -> Self {
        Self { thousandths }
    }

    pub fn thousandths(&self) -> i64 {
        self.thousandths
    }

    pub fn as_units_f64(&self) -> f64 {
        self.thousandths as f64 / SCALAR_FIXED_POINT_SCALE as f64
    }

    pub fn is_non_negative(&self) -> bool {
        self.thousandths >= 0
    }

    fn add(&self, other: &Self) -> Self {
        Self {
            thousandths: self.thousandths + other.thousandths,
        }
    }

    fn sub(&self, other: &Self) -> Self {
        Self {
            thousandths: self.thousandths - other.thousandths,
        }
    }

    fn le(&self, other: &Self) -> bool {
        self.thousandths <= other.thousandths
    }
}

/// Two-level map `device-uuid -> per-device-slot values`, for a single
/// category (memory/HBM, latency, stream count, device ids, health).
pub type DeviceSlots = BTreeMap<String, Vec<f64>>;

/// A vector resource: `category -> device-uuid -> [value per slot]`.
/// `expired` is a transient flag set on the right-hand operand of a
/// subtraction to request whole-category removal instead of pointwise
/// subtraction (§4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorResource {
    categories: BTreeMap<String, DeviceSlots>,
    #[serde(default)]
    expired: bool,
}

impl VectorResource {
    pub fn new() -> Self {
        Self {
            categories: BTreeMap::new(),
            expired: false,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>, slots: DeviceSlots) -> Self {
        self.categories.insert(category.into(), slots);
        self
    }

    /// Marks this vector resource as representing an expiring allocation;
    /// subtracting it removes whole categories rather than subtracting
    /// pointwise.
    pub fn expired(mut self) -> Self {
        self.expired = true;
        self
    }

    pub fn categories(&self) -> &BTreeMap<String, DeviceSlots> {
        &self.categories
    }

    pub fn is_non_negative(&self) -> bool {
        self.categories
            .values()
            .flat_map(|devices| devices.values())
            .flatten()
            .all(|v| *v >= 0.0)
    }

    fn add(&self, name: &str, other: &Self) -> Result<Self, AlgebraError> {
        let mut result = self.categories.clone();
        for (category, devices) in &other.categories {
            let entry = result.entry(category.clone()).or_default();
            for (uuid, slots) in devices {
                match entry.get_mut(uuid) {
                    Some(existing) => {
                        if existing.len() != slots.len() {
                            return Err(AlgebraError::SlotLengthMismatch {
                                name: name.to_string(),
                                uuid: uuid.clone(),
                                left: existing.len(),
                                right: slots.len(),
                            });
                        }
                        for (l, r) in existing.iter_mut().zip(slots.iter()) {
                            *l += r;
                        }
                    }
                    None => {
                        entry.insert(uuid.clone(), slots.clone());
                    }
                }
            }
        }
        Ok(Self {
            categories: result,
            expired: false,
        })
    }

    fn sub(&self, name: &str, other: &Self) -> Result<Self, AlgebraError> {
        let mut result = self.categories.clone();
        if other.expired {
            for category in other.categories.keys() {
                result.remove(category);
            }
            return Ok(Self {
                categories: result,
                expired: false,
            });
        }
        for (category, devices) in &other.categories {
            let Some(entry) = result.get_mut(category) else {
                continue;
            };
            for (uuid, slots) in devices {
                let Some(existing) = entry.get_mut(uuid) else {
                    continue;
                };
                if existing.len() != slots.len() {
                    return Err(AlgebraError::SlotLengthMismatch {
                        name: name.to_string(),
                        uuid: uuid.clone(),
                        left: existing.len(),
                        right: slots.len(),
                    });
                }
                for (l, r) in existing.iter_mut().zip(slots.iter()) {
                    *l -= r;
                }
            }
        }
        Ok(Self {
            categories: result,
            expired: false,
        })
    }

    fn le(&self, other: &Self) -> bool {
        self.categories.iter().all(|(category, devices)| {
            let Some(other_devices) = other.categories.get(category) else {
                return false;
            };
            devices.iter().all(|(uuid, slots)| {
                other_devices
                    .get(uuid)
                    .map(|other_slots| {
                        slots.len() == other_slots.len()
                            && slots.iter().zip(other_slots.iter()).all(|(l, r)| l <= r)
                    })
                    .unwrap_or(false)
            })
        })
    }
}

impl Default for VectorResource {
    fn default() -> Self {
        Self::new()
    }
}

/// A single named, typed resource value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    Scalar(ScalarResource),
    Vector(VectorResource),
}

impl Resource {
    pub fn type_name(&self) -> &'static str {
        match self {
            Resource::Scalar(_) => "scalar",
            Resource::Vector(_) => "vector",
        }
    }

    pub fn is_non_negative(&self) -> bool {
        match self {
            Resource::Scalar(s) => s.is_non_negative(),
            Resource::Vector(v) => v.is_non_negative(),
        }
    }

    pub fn add(&self, name: &str, other: &Self) -> Result<Self, AlgebraError> {
        match (self, other) {
            (Resource::Scalar(a), Resource::Scalar(b)) => Ok(Resource::Scalar(a.add(b))),
            (Resource::Vector(a), Resource::Vector(b)) => Ok(Resource::Vector(a.add(name, b)?)),
            _ => Err(AlgebraError::TypeMismatch {
                name: name.to_string(),
                expected: self.type_name(),
                found: other.type_name(),
            }),
        }
    }

    pub fn sub(&self, name: &str, other: &Self) -> Result<Self, AlgebraError> {
        match (self, other) {
            (Resource::Scalar(a), Resource::Scalar(b)) => Ok(Resource::Scalar(a.sub(b))),
            (Resource::Vector(a), Resource::Vector(b)) => Ok(Resource::Vector(a.sub(name, b)?)),
            _ => Err(AlgebraError::TypeMismatch {
                name: name.to_string(),
                expected: self.type_name(),
                found: other.type_name(),
            }),
        }
    }

    pub fn le(&self, other: &Self) -> bool {
        match (self, other) {
            (Resource::Scalar(a), Resource::Scalar(b)) => a.le(b),
            (Resource::Vector(a), Resource::Vector(b)) => a.le(b),
            _ => false,
        }
    }

    fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Resource::Scalar(a), Resource::Scalar(b)) => {
                ((a.thousandths - b.thousandths) as f64 / SCALAR_FIXED_POINT_SCALE as f64).abs()
                    < RESOURCES_EPSILON
            }
            (Resource::Vector(a), Resource::Vector(b)) => a == b,
            _ => false,
        }
    }
}

/// A mapping from resource name to `Resource`. Must be non-empty with
/// every entry valid (named, typed, non-negative) to be considered valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources(BTreeMap<String, Resource>);

impl Resources {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, resource: Resource) {
        self.0.insert(name.into(), resource);
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Resource)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Valid iff non-empty and every resource is non-negative (§4.1).
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|r| r.is_non_negative())
    }

    pub fn validate(&self) -> Result<(), AlgebraError> {
        if self.0.is_empty() {
            return Err(AlgebraError::Empty);
        }
        for (name, resource) in &self.0 {
            if !resource.is_non_negative() {
                let value = match resource {
                    Resource::Scalar(s) => s.thousandths(),
                    Resource::Vector(_) => -1,
                };
                return Err(AlgebraError::Negative {
                    name: name.clone(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Union of keys; matching keys are added, keys present in only one
    /// side are carried through unchanged.
    pub fn add(&self, other: &Self) -> Result<Self, AlgebraError> {
        let mut result = self.0.clone();
        for (name, value) in &other.0 {
            match result.get(name) {
                Some(existing) => {
                    let summed = existing.add(name, value)?;
                    result.insert(name.clone(), summed);
                }
                None => {
                    result.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(Self(result))
    }

    /// Subtracts matching keys; a key only in `self` is carried through
    /// unchanged (there is nothing to subtract it from).
    pub fn sub(&self, other: &Self) -> Result<Self, AlgebraError> {
        let mut result = self.0.clone();
        for (name, value) in &other.0 {
            if let Some(existing) = result.get(name) {
                let diff = existing.sub(name, value)?;
                result.insert(name.clone(), diff);
            }
        }
        Ok(Self(result))
    }

    /// Replaces abstract heterogeneous-card scalar keys (`VENDOR/PRODUCT/count`,
    /// `.../memory`, `.../stream`, …) with the resolved per-device vectors a
    /// scorer selected, leaving every other key (cpu, memory, and any
    /// already-vector resource not reallocated this pass) untouched. `self`
    /// is the instance's own request; `allocated` is a scorer's
    /// `allocated_vectors` (§4.3), keyed by the bare `VENDOR/PRODUCT` card
    /// type. A request with no heterogeneous resources, or a scorer that
    /// left `allocated` empty (the plain scalar path), returns `self`
    /// unchanged.
    pub fn merge_allocated(&self, allocated: &Self) -> Self {
        if allocated.0.is_empty() {
            return self.clone();
        }
        let mut result = self.0.clone();
        result.retain(|name, _| {
            !allocated
                .0
                .keys()
                .any(|card_type| name.starts_with(card_type.as_str()) && name[card_type.len()..].starts_with('/'))
        });
        for (card_type, resource) in &allocated.0 {
            result.insert(card_type.clone(), resource.clone());
        }
        Self(result)
    }

    /// Asymmetric `≤`: for every key in `self`, `other` has the same key
    /// with `self[k] <= other[k]`. Keys only in `other` are ignored (§4.1).
    pub fn le(&self, other: &Self) -> bool {
        self.0
            .iter()
            .all(|(name, value)| other.0.get(name).map(|o| value.le(o)).unwrap_or(false))
    }

    /// Equality with epsilon tolerance at the `Resources` level (§4.1).
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .all(|(name, value)| other.0.get(name).map(|o| value.approx_eq(o)).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(units: i64) -> Resource {
        Resource::Scalar(ScalarResource::from_units(units))
    }

    #[test]
    fn scalar_add_and_sub_use_fixed_point() {
        let a = ScalarResource::from_units(2);
        let b = ScalarResource::from_units(1);
        assert_eq!(a.add(&b).thousandths(), 3000);
        assert_eq!(a.sub(&b).thousandths(), 1000);
    }

    #[test]
    fn resources_validate_rejects_empty() {
        let resources = Resources::new();
        assert!(!resources.is_valid());
        assert_eq!(resources.validate(), Err(AlgebraError::Empty));
    }

    #[test]
    fn resources_validate_rejects_negative_scalar() {
        let mut resources = Resources::new();
        resources.insert("cpu", Resource::Scalar(ScalarResource::from_units(-1)));
        assert!(!resources.is_valid());
    }

    #[test]
    fn resources_le_ignores_keys_only_in_other() {
        let mut l = Resources::new();
        l.insert("cpu", scalar(1));

        let mut r = Resources::new();
        r.insert("cpu", scalar(2));
        r.insert("memory", scalar(1024));

        assert!(l.le(&r));
    }

    #[test]
    fn resources_le_fails_when_key_missing_on_right() {
        let mut l = Resources::new();
        l.insert("cpu", scalar(1));
        l.insert("memory", scalar(512));

        let mut r = Resources::new();
        r.insert("cpu", scalar(2));

        assert!(!l.le(&r));
    }

    #[test]
    fn resources_add_unions_keys() {
        let mut l = Resources::new();
        l.insert("cpu", scalar(1));

        let mut r = Resources::new();
        r.insert("memory", scalar(512));

        let summed = l.add(&r).unwrap();
        assert_eq!(summed.len(), 2);
    }

    #[test]
    fn vector_add_merges_categories_and_new_devices() {
        let a = VectorResource::new().with_category(
            "hbm",
            BTreeMap::from([("gpu-0".to_string(), vec![1.0, 2.0])]),
        );
        let b = VectorResource::new().with_category(
            "hbm",
            BTreeMap::from([
                ("gpu-0".to_string(), vec![1.0, 1.0]),
                ("gpu-1".to_string(), vec![4.0, 4.0]),
            ]),
        );

        let summed = a.add("hbm", &b).unwrap();
        let hbm = &summed.categories()["hbm"];
        assert_eq!(hbm["gpu-0"], vec![2.0, 3.0]);
        assert_eq!(hbm["gpu-1"], vec![4.0, 4.0]);
    }

    #[test]
    fn vector_sub_with_expired_removes_whole_category() {
        let a = VectorResource::new().with_category(
            "hbm",
            BTreeMap::from([("gpu-0".to_string(), vec![4.0, 4.0])]),
        );
        let expiring = VectorResource::new()
            .with_category("hbm", BTreeMap::new())
            .expired();

        let remaining = a.sub("hbm", &expiring).unwrap();
        assert!(!remaining.categories().contains_key("hbm"));
    }

    #[test]
    fn vector_sub_mismatched_slot_length_errors() {
        let a = VectorResource::new().with_category(
            "hbm",
            BTreeMap::from([("gpu-0".to_string(), vec![4.0, 4.0])]),
        );
        let b = VectorResource::new().with_category(
            "hbm",
            BTreeMap::from([("gpu-0".to_string(), vec![1.0])]),
        );

        assert!(matches!(
            a.sub("hbm", &b),
            Err(AlgebraError::SlotLengthMismatch { .. })
        ));
    }

    #[test]
    fn resources_approx_eq_tolerates_epsilon() {
        let mut l = Resources::new();
        l.insert("cpu", Resource::Scalar(ScalarResource::from_thousandths(1000)));

        let mut r = Resources::new();
        r.insert("cpu", Resource::Scalar(ScalarResource::from_thousandths(1000)));

        assert!(l.approx_eq(&r));
    }

    #[test]
    fn merge_allocated_is_noop_for_plain_scalar_requests() {
        let mut requested = Resources::new();
        requested.insert("cpu", scalar(300));
        requested.insert("memory", scalar(128));

        let merged = requested.merge_allocated(&Resources::new());
        assert_eq!(merged, requested);
    }

    #[test]
    fn merge_allocated_replaces_hetero_scalar_keys_and_keeps_cpu_mem() {
        let mut requested = Resources::new();
        requested.insert("cpu", scalar(300));
        requested.insert("memory", scalar(128));
        requested.insert("vendor/ascend910b/count", scalar(6));
        requested.insert("vendor/ascend910b/memory", scalar(20));

        let mut allocated = Resources::new();
        let vector = VectorResource::new().with_category(
            "memory",
            BTreeMap::from([("gpu-0".to_string(), vec![20.0, 20.0, 0.0])]),
        );
        allocated.insert("vendor/ascend910b", Resource::Vector(vector.clone()));

        let merged = requested.merge_allocated(&allocated);
        assert_eq!(merged.get("cpu"), Some(&scalar(300)));
        assert_eq!(merged.get("memory"), Some(&scalar(128)));
        assert_eq!(merged.get("vendor/ascend910b"), Some(&Resource::Vector(vector)));
        assert!(merged.get("vendor/ascend910b/count").is_none());
        assert!(merged.get("vendor/ascend910b/memory").is_none());
        assert_eq!(merged.len(), 3);
    }
}
