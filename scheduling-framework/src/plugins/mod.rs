//! Built-in filter/score plugins (§4.3).

pub mod default_filter;
pub mod default_heterogeneous_filter;
pub mod default_heterogeneous_scorer;
pub mod default_scorer;

pub use default_filter::DefaultFilter;
pub use default_heterogeneous_filter::DefaultHeterogeneousFilter;
pub use default_heterogeneous_scorer::DefaultHeterogeneousScorer;
pub use default_scorer::DefaultScorer;
