//! Domain models shared across the pipeline.
//!
//! - [`Record`] - one row of source data (JSON object)
//! - [`Entity`] - a hierarchy node with nested-set intervals
//! - [`WidgetResult`] - one computed artifact for `(group, entity, widget)`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// A source row: field name → value.
pub type Record = Map<String, Value>;

/// Normalize a JSON value into a lookup key.
///
/// Strings are used as-is and numbers by their JSON text, so `1` and `"1"`
/// address the same entity. Other values are not keys.
pub fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fetch a field of a record as a key.
pub fn record_key(record: &Record, field: &str) -> Option<String> {
    record.get(field).and_then(value_key)
}

// =============================================================================
// Entity
// =============================================================================

/// A node of an interval-encoded hierarchy.
///
/// Entities never own each other: the tree lives entirely in `left`,
/// `right` and `level`. `parent_id` is a weak back-reference kept for
/// display and rebuilds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub label: String,
    pub rank: String,
    pub parent_id: Option<String>,
    pub left: u32,
    pub right: u32,
    pub level: u32,
    #[serde(default)]
    pub attributes: Record,
}

impl Entity {
    /// Whether `other` lies strictly inside this entity's interval.
    pub fn is_ancestor_of(&self, other: &Entity) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// Whether this entity's interval contains `other` (or is `other`).
    pub fn contains(&self, other: &Entity) -> bool {
        self.left <= other.left && other.right <= self.right
    }

    /// Number of descendants encoded by the interval width.
    pub fn descendant_count(&self) -> u32 {
        (self.right - self.left - 1) / 2
    }

    pub fn is_leaf(&self) -> bool {
        self.right == self.left + 1
    }
}

// =============================================================================
// Widget results
// =============================================================================

/// Error marker stored in place of a widget value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub kind: ErrorKind,
    pub message: String,
}

/// One computed widget artifact.
///
/// `value` is `null` when `error` is set. The value is a pure function of
/// the configuration and inputs; `produced_at` is the only field that
/// changes between identical runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetResult {
    pub group_by: String,
    pub entity_id: String,
    pub widget: String,
    pub value: Value,
    pub produced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMarker>,
}

impl WidgetResult {
    pub fn success(group_by: &str, entity_id: &str, widget: &str, value: Value) -> Self {
        Self {
            group_by: group_by.to_string(),
            entity_id: entity_id.to_string(),
            widget: widget.to_string(),
            value,
            produced_at: Utc::now(),
            error: None,
        }
    }

    pub fn failure(
        group_by: &str,
        entity_id: &str,
        widget: &str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            group_by: group_by.to_string(),
            entity_id: entity_id.to_string(),
            widget: widget.to_string(),
            value: Value::Null,
            produced_at: Utc::now(),
            error: Some(ErrorMarker {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Value as exposed to renderers: the value itself or `{"error": marker}`.
    pub fn artifact(&self) -> Value {
        match &self.error {
            None => self.value.clone(),
            Some(marker) => serde_json::json!({
                "error": { "kind": marker.kind, "message": marker.message }
            }),
        }
    }
}
