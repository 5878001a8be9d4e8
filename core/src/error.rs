//! Error types for the Canopy transform pipeline.
//!
//! One error enum per layer, from the leaves up:
//!
//! - [`RegistryError`] - plugin registration and lookup
//! - [`LoadError`] - plugin module discovery
//! - [`ConfigError`] - reading configuration documents
//! - [`HierarchyError`] - nested-set construction
//! - [`StoreError`] - relational store access
//! - [`ExpressionError`] - computed field evaluation
//! - [`WidgetError`] - a single plugin invocation
//! - [`EngineError`] - a whole group
//! - [`PipelineError`] - top-level orchestration
//!
//! Every error reports an [`ErrorKind`], the stable category shown to users
//! in run summaries. Conversions are `From` based so `?` works across layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::plugins::PluginKind;
use crate::validation::ValidationReport;

// =============================================================================
// Error kinds
// =============================================================================

/// User-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ConfigurationError")]
    Configuration,
    #[serde(rename = "DuplicatePluginError")]
    DuplicatePlugin,
    #[serde(rename = "PluginNotFoundError")]
    PluginNotFound,
    #[serde(rename = "CyclicHierarchyError")]
    CyclicHierarchy,
    #[serde(rename = "CyclicWidgetDependencyError")]
    CyclicWidgetDependency,
    #[serde(rename = "SqlValidationError")]
    SqlValidation,
    #[serde(rename = "QueryTimeoutError")]
    QueryTimeout,
    #[serde(rename = "MissingDependencyError")]
    MissingDependency,
    #[serde(rename = "WidgetExecutionError")]
    WidgetExecution,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::DuplicatePlugin => "DuplicatePluginError",
            ErrorKind::PluginNotFound => "PluginNotFoundError",
            ErrorKind::CyclicHierarchy => "CyclicHierarchyError",
            ErrorKind::CyclicWidgetDependency => "CyclicWidgetDependencyError",
            ErrorKind::SqlValidation => "SqlValidationError",
            ErrorKind::QueryTimeout => "QueryTimeoutError",
            ErrorKind::MissingDependency => "MissingDependencyError",
            ErrorKind::WidgetExecution => "WidgetExecutionError",
        }
    }

    /// Parse the stored form back (used when reading results from the store).
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "ConfigurationError" => ErrorKind::Configuration,
            "DuplicatePluginError" => ErrorKind::DuplicatePlugin,
            "PluginNotFoundError" => ErrorKind::PluginNotFound,
            "CyclicHierarchyError" => ErrorKind::CyclicHierarchy,
            "CyclicWidgetDependencyError" => ErrorKind::CyclicWidgetDependency,
            "SqlValidationError" => ErrorKind::SqlValidation,
            "QueryTimeoutError" => ErrorKind::QueryTimeout,
            "MissingDependencyError" => ErrorKind::MissingDependency,
            "WidgetExecutionError" => ErrorKind::WidgetExecution,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the plugin registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A plugin with this name is already registered for the kind.
    #[error("{kind} plugin '{name}' is already registered")]
    DuplicatePlugin { name: String, kind: PluginKind },

    /// No plugin with this name is registered for the kind.
    #[error("{kind} plugin '{name}' not found")]
    PluginNotFound { name: String, kind: PluginKind },
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::DuplicatePlugin { .. } => ErrorKind::DuplicatePlugin,
            RegistryError::PluginNotFound { .. } => ErrorKind::PluginNotFound,
        }
    }
}

// =============================================================================
// Loader Errors
// =============================================================================

/// Errors raised while loading one plugin module.
///
/// The loader never propagates these past a single module; they end up as
/// warnings in the [`crate::plugins::LoadReport`].
#[derive(Debug, Error)]
pub enum LoadError {
    /// Failed to read a file or directory.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest could not be parsed.
    #[error("invalid plugin manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    /// A preset extends a plugin that is not registered.
    #[error("plugin '{name}' extends unknown {kind} plugin '{extends}'")]
    UnknownBase {
        name: String,
        kind: PluginKind,
        extends: String,
    },

    /// Registration was rejected by the registry.
    #[error("module '{module}' failed to register: {source}")]
    Registration {
        module: String,
        #[source]
        source: RegistryError,
    },

    /// The module's registration entry point panicked.
    #[error("module '{0}' panicked during registration")]
    Panic(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while reading configuration documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a document.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid YAML/JSON or does not match the expected shape.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A mandatory document is missing.
    #[error("missing configuration document: {0}")]
    Missing(PathBuf),
}

// =============================================================================
// Hierarchy Errors
// =============================================================================

/// Errors while building a nested-set hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    /// Parent links form a cycle.
    #[error("cyclic hierarchy: entity '{id}' is its own ancestor")]
    CyclicHierarchy { id: String },

    /// Two rows share the same id.
    #[error("duplicate entity id '{0}'")]
    DuplicateEntity(String),

    /// A row references a parent that does not exist.
    #[error("entity '{id}' references unknown parent '{parent}'")]
    UnknownParent { id: String, parent: String },

    /// A source record lacks the fields needed to form a row.
    #[error("invalid hierarchy row {index}: {message}")]
    InvalidRow { index: usize, message: String },
}

impl HierarchyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HierarchyError::CyclicHierarchy { .. } => ErrorKind::CyclicHierarchy,
            _ => ErrorKind::Configuration,
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the relational store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A table or column name is not a plain identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A stored row could not be decoded.
    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    /// A read query ran past its deadline and was interrupted.
    #[error("query interrupted after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

// =============================================================================
// Expression Errors
// =============================================================================

/// Errors from the computed field evaluator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// Expression text is malformed.
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Identifier is not a declared or available dependency.
    #[error("missing dependency '{0}'")]
    MissingDependency(String),

    /// Function is not on the allow-list.
    #[error("function '{0}' is not allowed")]
    UnknownFunction(String),

    /// Operand of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// Evaluation failed (division by zero, bad argument count...).
    #[error("evaluation error: {0}")]
    Eval(String),
}

impl ExpressionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExpressionError::MissingDependency(_) => ErrorKind::MissingDependency,
            _ => ErrorKind::WidgetExecution,
        }
    }
}

// =============================================================================
// Widget Errors
// =============================================================================

/// Failure of a single plugin invocation.
///
/// These are recorded as error markers on the widget's result and never
/// stop sibling widgets (unless the widget is required).
#[derive(Debug, Error)]
pub enum WidgetError {
    /// SQL rejected before execution.
    #[error("SQL validation failed: {0}")]
    SqlValidation(String),

    /// Query exceeded its timeout.
    #[error("query '{query}' timed out after {timeout_ms} ms")]
    QueryTimeout { query: String, timeout_ms: u64 },

    /// Computed field failed.
    #[error("computed field '{field}': {source}")]
    Expression {
        field: String,
        #[source]
        source: ExpressionError,
    },

    /// Parameters do not have the shape the plugin expects.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// An upstream widget this one depends on failed.
    #[error("dependency '{0}' has no result")]
    DependencyFailed(String),

    /// Plugin lookup failed at dispatch time.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Hierarchy needed by the plugin could not be built.
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    /// Store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Any other plugin failure.
    #[error("{0}")]
    Execution(String),
}

impl WidgetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WidgetError::SqlValidation(_) => ErrorKind::SqlValidation,
            WidgetError::QueryTimeout { .. } => ErrorKind::QueryTimeout,
            WidgetError::Expression { source, .. } => source.kind(),
            WidgetError::InvalidParams(_) => ErrorKind::Configuration,
            WidgetError::Registry(e) => e.kind(),
            WidgetError::Hierarchy(e) => e.kind(),
            WidgetError::DependencyFailed(_)
            | WidgetError::Store(_)
            | WidgetError::Execution(_) => ErrorKind::WidgetExecution,
        }
    }

    pub fn params(err: impl fmt::Display) -> Self {
        WidgetError::InvalidParams(err.to_string())
    }
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Failure of a whole group. Other groups of the run are unaffected.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown group requested.
    #[error("no group '{0}' in transform configuration")]
    UnknownGroup(String),

    /// Named source is not declared in the import configuration.
    #[error("source '{0}' is not declared")]
    UnknownSource(String),

    /// A source loader failed.
    #[error("loading source '{source_name}' failed: {error}")]
    Source {
        source_name: String,
        #[source]
        error: WidgetError,
    },

    /// Widget dependencies form a cycle.
    #[error("cyclic widget dependency in group '{group}': {}", widgets.join(" -> "))]
    CyclicWidgetDependency { group: String, widgets: Vec<String> },

    /// A `depends_on` entry names a widget that does not exist.
    #[error("widget '{widget}' depends on unknown widget '{dependency}'")]
    UnknownDependency { widget: String, dependency: String },

    /// Group hierarchy could not be built.
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    /// A required widget failed; the rest of the group was abandoned.
    #[error("required widget '{widget}' failed for entity '{entity_id}': {error}")]
    RequiredWidgetFailed {
        widget: String,
        entity_id: String,
        #[source]
        error: WidgetError,
    },

    /// Persisting results failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnknownGroup(_)
            | EngineError::UnknownSource(_)
            | EngineError::UnknownDependency { .. } => ErrorKind::Configuration,
            EngineError::Source { error, .. } => error.kind(),
            EngineError::CyclicWidgetDependency { .. } => ErrorKind::CyclicWidgetDependency,
            EngineError::Hierarchy(e) => e.kind(),
            EngineError::RequiredWidgetFailed { error, .. } => error.kind(),
            EngineError::Store(_) => ErrorKind::WidgetExecution,
        }
    }
}

/// Plugins reach sources and hierarchies through the run context; its
/// errors surface on the widget that asked.
impl From<EngineError> for WidgetError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Source { error, .. } => error,
            EngineError::Hierarchy(e) => WidgetError::Hierarchy(e),
            EngineError::Store(e) => WidgetError::Store(e),
            EngineError::UnknownSource(name) => {
                WidgetError::InvalidParams(format!("source '{}' is not declared", name))
            }
            other => WidgetError::Execution(other.to_string()),
        }
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level errors returned by the CLI-facing entry points.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration documents could not be read.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Configuration failed validation; the run never started.
    #[error("Configuration is invalid:\n{0}")]
    InvalidConfig(ValidationReport),

    /// Group-level failure surfaced outside a run (e.g. hierarchy rebuild).
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Hierarchy error.
    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Exporter failure.
    #[error("Export error: {0}")]
    Export(#[from] WidgetError),

    /// No export target with this name.
    #[error("no export target '{0}'")]
    UnknownTarget(String),

    /// Hierarchy rebuild requested for a group that declares none.
    #[error("group '{0}' has no hierarchy")]
    NoHierarchy(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for hierarchy construction.
pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for plugin invocations.
pub type WidgetResultOf<T> = Result<T, WidgetError>;

/// Result type for group processing.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for top-level operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let hierarchy_err = HierarchyError::CyclicHierarchy { id: "7".into() };
        let engine_err: EngineError = hierarchy_err.into();
        assert_eq!(engine_err.kind(), ErrorKind::CyclicHierarchy);

        let registry_err = RegistryError::PluginNotFound {
            name: "nope".into(),
            kind: PluginKind::Transformer,
        };
        let widget_err: WidgetError = registry_err.into();
        assert_eq!(widget_err.kind(), ErrorKind::PluginNotFound);
        assert!(widget_err.to_string().contains("nope"));
    }

    #[test]
    fn test_expression_missing_dependency_kind() {
        let err = WidgetError::Expression {
            field: "ratio".into(),
            source: ExpressionError::MissingDependency("b".into()),
        };
        assert_eq!(err.kind(), ErrorKind::MissingDependency);
        assert!(err.to_string().contains("ratio"));
    }

    #[test]
    fn test_error_kind_round_trip() {
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::QueryTimeout,
            ErrorKind::WidgetExecution,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        let json = serde_json::to_string(&ErrorKind::SqlValidation).unwrap();
        assert_eq!(json, "\"SqlValidationError\"");
    }

    #[test]
    fn test_cycle_message_lists_widgets() {
        let err = EngineError::CyclicWidgetDependency {
            group: "taxon".into(),
            widgets: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "cyclic widget dependency in group 'taxon': a -> b");
    }
}
