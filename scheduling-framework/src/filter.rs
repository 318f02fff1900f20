//! Filter stage of the plugin pipeline (§4.3).

use crate::context::PreAllocatedContext;
use crate::error::FrameworkError;
use resource_view::{InstanceInfo, ResourceUnit, ResourceView};

/// Outcome of running one filter plugin against one candidate unit.
#[derive(Debug, Clone)]
pub struct Filtered {
    pub status: Result<(), FrameworkError>,
    /// When set, the pipeline stops evaluating further units for this
    /// request entirely (not just further plugins against this unit).
    pub stop_iteration: bool,
    /// Maximum number of this instance's replicas that fit on the unit;
    /// `-1` when the filter rejected the unit outright.
    pub available_for_request: i64,
    pub explain: Option<String>,
}

impl Filtered {
    pub fn ok(available_for_request: i64) -> Self {
        Self {
            status: Ok(()),
            stop_iteration: false,
            available_for_request,
            explain: None,
        }
    }

    pub fn rejected(status: FrameworkError, explain: impl Into<String>) -> Self {
        Self {
            status: Err(status),
            stop_iteration: false,
            available_for_request: -1,
            explain: Some(explain.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// A filter plugin decides whether `unit` is eligible to host `instance`
/// and how many replicas of it the unit could take. `view` is the
/// resource view `unit` was drawn from, passed through so plugins that
/// need the aggregate bucket index (monopoly candidate counts) can
/// consult it — that index lives on `ResourceView`, not on each unit;
/// see the design note in `resource-view`.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn filter(
        &self,
        ctx: &PreAllocatedContext,
        view: &ResourceView,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Filtered;
}
