//! Layered configuration for the mesh scheduler: defaults, overridden by a
//! TOML file, overridden by `MESH_SCHED_*` environment variables.

use crate::error::config_err_helper::ConfigLoadError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Top-level configuration, composed of one section per crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub node_id: Option<String>,
    pub resource_view: ResourceViewConfig,
    pub queue: QueueConfig,
    pub control: ControlConfig,
    pub underlayer: UnderlayerConfig,
    pub logging: LoggingConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            resource_view: ResourceViewConfig::default(),
            queue: QueueConfig::default(),
            control: ControlConfig::default(),
            underlayer: UnderlayerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Resource view poller and idle-recycle timing (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceViewConfig {
    /// Domain-side poll interval against each known local (§4.2: default 1000ms).
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// How long an instance-less unit sits idle before it is marked disabled.
    #[serde(with = "duration_ms")]
    pub idle_to_recycle: Duration,
    /// Upper bound on the number of change-log entries kept per window.
    pub max_window_entries: usize,
}

impl Default for ResourceViewConfig {
    fn default() -> Self {
        Self {
            poll_interval: millis(1000),
            idle_to_recycle: secs(300),
            max_window_entries: 4096,
        }
    }
}

/// Priority/fairness queue dispatch timing (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Default per-request schedule timeout when the caller omits one.
    #[serde(with = "duration_ms")]
    pub default_schedule_timeout: Duration,
    pub max_queue_depth: usize,
    /// When `true`, same-priority requests are served round-robin instead
    /// of strict FIFO, so a burst at one priority can't starve another
    /// priority level waiting behind it (§4.4 "orders requests by
    /// priority... fairness mode").
    pub fairness_enabled: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_schedule_timeout: secs(30),
            max_queue_depth: 100_000,
            fairness_enabled: true,
        }
    }
}

/// Instance/group control retry policy (§4.5, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// `CreateAgent` retry interval, clamped to [50ms, 10s] (§4.5).
    #[serde(with = "duration_ms")]
    pub scaler_retry_interval: Duration,
    #[serde(with = "duration_ms")]
    pub scaler_retry_interval_min: Duration,
    #[serde(with = "duration_ms")]
    pub scaler_retry_interval_max: Duration,
    pub scaler_max_attempts: u32,
    /// While an agent is being created, reschedule retry interval (§4.5: 1s).
    #[serde(with = "duration_ms")]
    pub creating_retry_interval: Duration,
    pub creating_max_attempts: u32,
    /// Bounds the number of genuine (pipeline-level) conflict rebids a
    /// request goes through before the top-level domain surfaces
    /// `ERR_RESOURCE_NOT_ENOUGH` to the caller (§4.5: "a per-request
    /// try-count bounds the conflict retries"). Plain underlayer
    /// `SCHEDULE_CONFLICTED` retries are explicitly excluded from this
    /// count by §4.5 and so don't consume it.
    pub max_schedule_tries: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            scaler_retry_interval: secs(50),
            scaler_retry_interval_min: millis(50),
            scaler_retry_interval_max: secs(10),
            scaler_max_attempts: 3,
            creating_retry_interval: secs(1),
            creating_max_attempts: 120,
            max_schedule_tries: 5,
        }
    }
}

/// Underlayer heartbeat and health tracking (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderlayerConfig {
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout multiplier (§4.7: "timeout 12x interval").
    pub heartbeat_timeout_multiplier: u32,
}

impl UnderlayerConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_timeout_multiplier
    }
}

impl Default for UnderlayerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: secs(1),
            heartbeat_timeout_multiplier: 12,
        }
    }
}

/// Logging configuration, following the teacher's `LoggingConfig` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

impl SchedulerConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// `MESH_SCHED_*` environment overrides on top.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigLoadError> {
        let mut config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
                        path: path.to_string(),
                        source,
                    })?;
                toml::from_str(&content)?
            }
            None => SchedulerConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(node_id) = std::env::var("MESH_SCHED_NODE_ID") {
            self.node_id = Some(node_id);
        }
        if let Ok(level) = std::env::var("MESH_SCHED_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(ms) = std::env::var("MESH_SCHED_POLL_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.resource_view.poll_interval = millis(ms);
            }
        }
        if let Ok(ms) = std::env::var("MESH_SCHED_HEARTBEAT_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.underlayer.heartbeat_interval = millis(ms);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.resource_view.poll_interval.is_zero() {
            return Err(ConfigLoadError::Invalid(
                "resource_view.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.control.scaler_retry_interval_min > self.control.scaler_retry_interval_max {
            return Err(ConfigLoadError::Invalid(
                "control.scaler_retry_interval_min must not exceed scaler_retry_interval_max"
                    .to_string(),
            ));
        }
        if self.underlayer.heartbeat_interval.is_zero() {
            return Err(ConfigLoadError::Invalid(
                "underlayer.heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = SchedulerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SchedulerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            config.resource_view.poll_interval,
            parsed.resource_view.poll_interval
        );
    }

    #[test]
    fn heartbeat_timeout_is_twelve_times_interval() {
        let config = UnderlayerConfig::default();
        assert_eq!(config.heartbeat_timeout(), secs(12));
    }

    #[test]
    fn load_with_missing_file_returns_io_error() {
        let err = SchedulerConfig::load(Some("/nonexistent/path.toml")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Io { .. }));
    }
}
