//! Common types shared by every crate in the mesh scheduler workspace.
//!
//! This crate provides the identifiers, the top-level error type, the
//! layered configuration loader, time helpers and an in-process metrics
//! registry used across the resource view, scheduling framework, queue,
//! instance/group control and underlayer crates.

pub mod config;
pub mod error;
pub mod id;
pub mod metrics;
pub mod time;

pub use config::SchedulerConfig;
pub use error::{RetryClass, Result, SchedulerError};
pub use id::{GroupId, InstanceId, RequestId, TenantId, UnitId};
pub use metrics::{Histogram, MetricsRegistry};
pub use time::Timestamp;

/// Current revision of the resource-unit change-log protocol (§3, §4.2).
pub const CHANGE_LOG_PROTOCOL_VERSION: u32 = 1;

/// Epsilon used for scalar-resource equality comparisons at the
/// `Resources` level (§4.1).
pub const RESOURCES_EPSILON: f64 = 1e-8;

/// Fixed-point scale factor for scalar resource arithmetic (§3: "values are
/// scaled by 1000 internally").
pub const SCALAR_FIXED_POINT_SCALE: i64 = 1000;

/// Crate version, surfaced in logs the way the teacher's workspace does.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize process-wide tracing. Idempotent: a second call in the same
/// process (e.g. from a test) is a no-op rather than a panic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mesh_scheduler=info")),
        )
        .with_target(true)
        .try_init();
}
