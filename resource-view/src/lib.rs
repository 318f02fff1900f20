//! Per-node `ResourceUnit` tree, bucket accounting and windowed delta
//! replication (§3, §4.2).
//!
//! Owned exclusively by one actor at a time (local proxy or domain
//! scheduler) and driven synchronously through `&mut self`; see the
//! module doc on `view::ResourceView`.

pub mod change;
pub mod error;
pub mod idle_recycle;
pub mod poller;
pub mod unit;
pub mod view;

pub use change::{
    merge_local_resource_view_changes, InstanceChange, InstanceChangeKind, LabelChange,
    LoggedChange, ResourceChange, ResourceUnitChange, ResourceUnitChanges,
};
pub use error::{Result, ViewError};
pub use idle_recycle::{resolve_policy as resolve_idle_recycle_policy, IdleToRecyclePolicy};
pub use poller::{LocalWindowSource, ResourcePoller};
pub use unit::{
    mem_cpu_shape, Bucket, BucketCounts, InstanceInfo, MemKey, RatioKey, ResourceSelector,
    ResourceUnit, ScheduleOption, SchedulePolicyName, UnitStatus, ViewInitTime,
};
pub use view::{
    InstanceAllocatedInfo, ResourceUpdate, ResourceView, ResourceViewSettings, UpdateKind,
};
