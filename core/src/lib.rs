//! # Canopy - configuration-driven widget pipeline
//!
//! Canopy turns hierarchical reference data (taxonomies, plot networks) and
//! flat observation records into named JSON "widget" artifacts, one per
//! `(group, entity, widget)`. Plugins do the work; configuration decides
//! which plugins run, in what order, over which data.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Plugin    │────▶│   Plugin    │────▶│   Config    │────▶│  Transform  │──▶ widget_results
//! │   Loader    │     │  Registry   │     │  Validator  │     │   Engine    │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                                    │
//!                                              ┌─────────────┐       │
//!                                              │  Hierarchy  │◀──────┘
//!                                              │   Builder   │
//!                                              └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use canopy::plugins::{global, PluginLoader};
//! use canopy::Pipeline;
//!
//! #[tokio::main]
//! async fn main() {
//!     global::load(PluginLoader::new(vec![]));
//!     let pool = sqlx::SqlitePool::connect("sqlite://canopy.db").await.unwrap();
//!     let pipeline = Pipeline::open("config".as_ref(), pool, global::snapshot()).await.unwrap();
//!     let summary = pipeline.run(Some("taxon")).await.unwrap();
//!     println!("{}", summary);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Records, entities and widget results
//! - [`config`] - Import, transform and export documents
//! - [`plugins`] - Registry, loader and bundled plugins
//! - [`validation`] - JSON Schema checks and the configuration validator
//! - [`hierarchy`] - Nested-set hierarchy builder
//! - [`expression`] - Sandboxed computed-field expressions
//! - [`store`] - SQLite result and entity tables
//! - [`transform`] - Engine, ordering and project pipeline
//! - [`logs`] - Run-log broadcast

// Core modules
pub mod error;
pub mod models;
pub mod config;

// Plugins
pub mod plugins;

// Validation
pub mod validation;

// Data
pub mod hierarchy;
pub mod store;

// Transformation
pub mod expression;
pub mod transform;

// Logging
pub mod logs;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    EngineError,
    ErrorKind,
    ExpressionError,
    HierarchyError,
    LoadError,
    PipelineError,
    RegistryError,
    StoreError,
    WidgetError,
};

// =============================================================================
// Re-exports - Models & configuration
// =============================================================================

pub use models::{Entity, ErrorMarker, Record, WidgetResult};

pub use config::{
    ExportConfig,
    GroupConfig,
    HierarchySpec,
    ImportConfig,
    ProjectConfig,
    SourceRef,
    TransformConfig,
    WidgetConfig,
};

// =============================================================================
// Re-exports - Plugins
// =============================================================================

pub use plugins::{
    Exporter,
    Loader,
    LoadReport,
    PluginDescriptor,
    PluginKind,
    PluginLoader,
    PluginRegistry,
    Transformer,
    Widget,
    WidgetInput,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{is_valid, validate, ConfigIssue, ConfigValidator, ValidationReport};

// =============================================================================
// Re-exports - Hierarchy & store
// =============================================================================

pub use hierarchy::{build_hierarchy, EntityTable, Hierarchy, HierarchyRow};
pub use store::Store;

// =============================================================================
// Re-exports - Transform
// =============================================================================

pub use expression::Expression;
pub use transform::{GroupSummary, Pipeline, RunSummary, TransformEngine, WidgetSummary};
