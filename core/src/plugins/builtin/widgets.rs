//! Bundled widget contracts.
//!
//! Rendering happens outside the core; a widget plugin only states which
//! parameters it takes and which data shape it can draw.

use serde_json::{json, Value};

use crate::plugins::Widget;

/// Key/value grid over an object.
pub struct InfoGrid;

impl Widget for InfoGrid {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["field"],
                        "properties": {
                            "field": { "type": "string" },
                            "label": { "type": "string" },
                            "unit": { "type": "string" }
                        }
                    }
                }
            }
        })
    }

    fn data_schema(&self) -> Value {
        json!({ "type": "object" })
    }
}

/// Bars from a list of `{label, count}`-like rows.
pub struct BarPlot;

impl Widget for BarPlot {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "x_field": { "type": "string" },
                "y_field": { "type": "string" },
                "orientation": { "enum": ["h", "v"] },
                "sort": { "type": "boolean" }
            }
        })
    }

    fn data_schema(&self) -> Value {
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "minProperties": 2
            }
        })
    }
}

/// Dumps any value as-is.
pub struct RawData;

impl Widget for RawData {}
