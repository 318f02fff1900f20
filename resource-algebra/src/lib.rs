//! Scalar and vector resource arithmetic, `Resources` validation and
//! comparison, and label multiset counters (§4.1).
//!
//! This crate has no async runtime dependency: everything here is pure,
//! synchronous arithmetic consumed by `resource-view` and
//! `scheduling-framework`.

pub mod error;
pub mod labels;
pub mod resource;

pub use error::AlgebraError;
pub use labels::LabelCounter;
pub use resource::{Resource, Resources, ScalarResource, VectorResource};
