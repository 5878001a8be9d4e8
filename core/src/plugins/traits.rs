//! Interfaces implemented by each plugin kind.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::config::ExportTarget;
use crate::error::WidgetError;
use crate::hierarchy::Hierarchy;
use crate::models::{Entity, Record, WidgetResult};
use crate::store::Store;
use crate::transform::RunContext;

use super::PluginRegistry;

fn any_object() -> Value {
    json!({ "type": "object" })
}

/// Everything a transformer sees for one `(entity, widget, step)`.
pub struct WidgetInput<'a> {
    pub group_by: &'a str,
    pub widget: &'a str,
    pub entity_id: &'a str,
    /// Hierarchy node, for hierarchy-aware groups
    pub entity: Option<&'a Entity>,
    /// The group's hierarchy, for hierarchy-aware groups
    pub hierarchy: Option<&'a Hierarchy>,
    /// Primary records of the entity (after joins), or the rows produced by
    /// the previous step when it returned a list of objects
    pub records: &'a [Record],
    /// Output of the previous step of the same widget
    pub previous: Option<&'a Value>,
    /// Results of the widgets listed in `depends_on`
    pub dependencies: &'a IndexMap<String, Value>,
    pub run: &'a RunContext,
}

/// Produces records from a store or from configuration.
#[async_trait]
pub trait Loader: Send + Sync {
    fn param_schema(&self) -> Value {
        any_object()
    }

    async fn load(&self, store: &Store, params: &Value) -> Result<Vec<Record>, WidgetError>;
}

/// Computes one widget value.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn param_schema(&self) -> Value {
        any_object()
    }

    async fn transform(&self, input: &WidgetInput<'_>, params: &Value) -> Result<Value, WidgetError>;
}

/// What an exporter produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportOutcome {
    pub files: Vec<PathBuf>,
    /// Non-fatal problems (e.g. widget data that does not match its renderer)
    pub warnings: Vec<String>,
}

/// Publishes persisted widget results.
pub trait Exporter: Send + Sync {
    fn param_schema(&self) -> Value {
        any_object()
    }

    fn export(
        &self,
        target: &ExportTarget,
        results: &IndexMap<String, Vec<WidgetResult>>,
        registry: &PluginRegistry,
    ) -> Result<ExportOutcome, WidgetError>;
}

/// A renderer contract: which parameters it takes and which data it renders.
pub trait Widget: Send + Sync {
    fn param_schema(&self) -> Value {
        any_object()
    }

    /// JSON Schema of the widget data the renderer accepts.
    fn data_schema(&self) -> Value {
        json!({})
    }
}
