//! Label multiset counters (§4.1).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A multiset of label values keyed by label key, e.g. `node_labels` on a
/// `ResourceUnit`. Addition unions keys and sums counts; subtraction
/// decrements and erases keys whose count reaches zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounter(BTreeMap<String, BTreeMap<String, u64>>);

impl LabelCounter {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parses `"k:v"` into `{k: {v: 1}}`. Splits at most once on the first
    /// colon; a bare `"k"` (no colon) produces `{k: {"": 1}}` (§4.1).
    pub fn from_kv(s: &str) -> Self {
        let (key, value) = match s.split_once(':') {
            Some((k, v)) => (k, v),
            None => (s, ""),
        };
        let mut counts = BTreeMap::new();
        counts.insert(value.to_string(), 1);
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), counts);
        Self(map)
    }

    pub fn get(&self, key: &str, value: &str) -> u64 {
        self.0
            .get(key)
            .and_then(|values| values.get(value))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn values_for(&self, key: &str) -> Option<&BTreeMap<String, u64>> {
        self.0.get(key)
    }

    /// Unions keys and sums counts.
    pub fn add(&self, other: &Self) -> Self {
        let mut result = self.0.clone();
        for (key, values) in &other.0 {
            let entry = result.entry(key.clone()).or_default();
            for (value, count) in values {
                *entry.entry(value.clone()).or_insert(0) += count;
            }
        }
        Self(result)
    }

    /// Decrements counts, erasing a value entry once its count reaches
    /// zero and erasing the key entirely once no values remain.
    pub fn sub(&self, other: &Self) -> Self {
        let mut result = self.0.clone();
        for (key, values) in &other.0 {
            let Some(entry) = result.get_mut(key) else {
                continue;
            };
            for (value, count) in values {
                if let Some(existing) = entry.get_mut(value) {
                    *existing = existing.saturating_sub(*count);
                    if *existing == 0 {
                        entry.remove(value);
                    }
                }
            }
            if entry.is_empty() {
                result.remove(key);
            }
        }
        Self(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_kv_splits_on_first_colon_only() {
        let counter = LabelCounter::from_kv("zone:us-east:1");
        assert_eq!(counter.get("zone", "us-east:1"), 1);
    }

    #[test]
    fn from_kv_bare_key_uses_empty_value() {
        let counter = LabelCounter::from_kv("gpu");
        assert_eq!(counter.get("gpu", ""), 1);
    }

    #[test]
    fn add_unions_and_sums() {
        let a = LabelCounter::from_kv("zone:us-east");
        let b = LabelCounter::from_kv("zone:us-east");
        let summed = a.add(&b);
        assert_eq!(summed.get("zone", "us-east"), 2);
    }

    #[test]
    fn sub_erases_key_once_count_reaches_zero() {
        let a = LabelCounter::from_kv("zone:us-east");
        let b = LabelCounter::from_kv("zone:us-east");
        let diff = a.sub(&b);
        assert!(diff.is_empty());
    }

    #[test]
    fn sub_leaves_other_values_for_same_key_intact() {
        let mut a = LabelCounter::from_kv("zone:us-east");
        a = a.add(&LabelCounter::from_kv("zone:us-west"));
        let diff = a.sub(&LabelCounter::from_kv("zone:us-east"));
        assert_eq!(diff.get("zone", "us-west"), 1);
        assert_eq!(diff.get("zone", "us-east"), 0);
    }
}
