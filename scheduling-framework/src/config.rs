//! Plugin registration and weighting for the scheduling pipeline (§4.3).
//!
//! Global timing/retry knobs live in `scheduler_shared::config`; this
//! section is specific to which filter/score plugins run and in what
//! order, mirroring the teacher's per-subsystem config sections.

use serde::{Deserialize, Serialize};

/// Ordered plugin chain plus the label-affinity strictness mode, loaded
/// as the `[scheduling_framework]` section of the top-level config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Filter plugin names, run in order; the first rejection short-circuits
    /// the unit (unless `stop_iteration` is false, in which case later
    /// plugins may still run — see `PluginRegistry::run_filters`).
    pub filter_plugins: Vec<String>,
    /// Score plugin names; scores are summed weighted per plugin then
    /// averaged by total weight.
    pub score_plugins: Vec<String>,
    pub plugin_weights: std::collections::BTreeMap<String, f64>,
    /// `true` makes `LabelAffinityFilter` reject on no match; `false`
    /// (default) only penalizes the score (§4.3).
    pub strict_label_affinity: bool,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            filter_plugins: vec![
                "DefaultFilter".to_string(),
                "DefaultHeterogeneousFilter".to_string(),
                "LabelAffinityFilter".to_string(),
            ],
            score_plugins: vec![
                "DefaultScorer".to_string(),
                "DefaultHeterogeneousScorer".to_string(),
                "LabelAffinityScorePlugin".to_string(),
            ],
            plugin_weights: Default::default(),
            strict_label_affinity: false,
        }
    }
}

impl FrameworkConfig {
    pub fn weight_of(&self, plugin: &str) -> f64 {
        self.plugin_weights.get(plugin).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_default_filter_first() {
        let config = FrameworkConfig::default();
        assert_eq!(config.filter_plugins.first().map(String::as_str), Some("DefaultFilter"));
    }

    #[test]
    fn unweighted_plugin_defaults_to_one() {
        let config = FrameworkConfig::default();
        assert_eq!(config.weight_of("DefaultScorer"), 1.0);
    }
}
