//! Score stage of the plugin pipeline (§4.3).

use crate::context::PreAllocatedContext;
use resource_algebra::Resources;
use resource_view::{InstanceInfo, ResourceUnit};

/// Outcome of running one scorer plugin against one eligible unit.
/// `score` in `[0, 100]`; negative scores drop the unit from
/// consideration. `allocated_vectors` is the exact resource slice the
/// scorer would subtract if this unit is chosen, used to keep later
/// plugins' view of "available" consistent within the same pass.
#[derive(Debug, Clone, Default)]
pub struct Scored {
    pub score: f64,
    pub allocated_vectors: Resources,
    pub real_ids: Vec<String>,
    pub hetero_product_name: Option<String>,
}

impl Scored {
    pub fn is_eligible(&self) -> bool {
        self.score >= 0.0
    }
}

/// A score plugin ranks an already-filtered unit for one instance.
pub trait Score: Send + Sync {
    fn name(&self) -> &str;

    fn score(
        &self,
        ctx: &PreAllocatedContext,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Scored;
}
