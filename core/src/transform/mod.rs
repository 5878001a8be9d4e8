//! Transform engine.
//!
//! - [`pipeline`] - project facade: validate, run, rebuild hierarchies, export
//! - [`engine`] - group state machine and run orchestration
//! - [`context`] - per-run source and hierarchy caches handed to plugins
//! - [`sources`] - joins and per-entity record selection
//! - [`ordering`] - widget dependency order
//! - [`summary`] - structured run outcome

pub mod context;
pub mod engine;
pub mod ordering;
pub mod pipeline;
pub mod sources;
pub mod summary;

pub use context::RunContext;
pub use engine::{GroupStage, TransformEngine};
pub use ordering::execution_order;
pub use pipeline::Pipeline;
pub use summary::{GroupStatus, GroupSummary, RunSummary, WidgetFailure, WidgetSummary};
