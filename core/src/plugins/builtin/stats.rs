//! Small descriptive transformers.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::WidgetError;
use crate::plugins::{Transformer, WidgetInput};

#[derive(Debug, Deserialize)]
struct FieldStatsParams {
    field: String,
}

/// `field_stats`: count, min, max, sum and mean of a numeric field.
///
/// Non-numeric and missing values are ignored. With no numeric value the
/// count is 0 and the other statistics are null.
pub struct FieldStats;

#[async_trait]
impl Transformer for FieldStats {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["field"],
            "properties": { "field": { "type": "string" } }
        })
    }

    async fn transform(&self, input: &WidgetInput<'_>, params: &Value) -> Result<Value, WidgetError> {
        let params: FieldStatsParams = serde_json::from_value(params.clone()).map_err(WidgetError::params)?;
        let numbers: Vec<f64> = input
            .records
            .iter()
            .filter_map(|r| r.get(&params.field).and_then(Value::as_f64))
            .collect();

        if numbers.is_empty() {
            return Ok(json!({ "count": 0, "min": null, "max": null, "sum": null, "mean": null }));
        }

        let sum: f64 = numbers.iter().sum();
        let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(json!({
            "count": numbers.len(),
            "min": min,
            "max": max,
            "sum": sum,
            "mean": sum / numbers.len() as f64,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct EntityInfoParams {
    /// Entity attributes (or first-record fields) to copy
    #[serde(default)]
    fields: Vec<String>,
}

/// `entity_info`: identity and position of the entity.
pub struct EntityInfo;

#[async_trait]
impl Transformer for EntityInfo {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fields": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    async fn transform(&self, input: &WidgetInput<'_>, params: &Value) -> Result<Value, WidgetError> {
        let params: EntityInfoParams = if params.is_null() {
            EntityInfoParams::default()
        } else {
            serde_json::from_value(params.clone()).map_err(WidgetError::params)?
        };

        let mut info = Map::new();
        info.insert("id".into(), json!(input.entity_id));
        info.insert("record_count".into(), json!(input.records.len()));

        let attributes = match input.entity {
            Some(entity) => {
                info.insert("label".into(), json!(entity.label));
                info.insert("rank".into(), json!(entity.rank));
                info.insert("level".into(), json!(entity.level));
                info.insert("descendant_count".into(), json!(entity.descendant_count()));
                if let Some(hierarchy) = input.hierarchy {
                    let path: Vec<&str> = hierarchy
                        .ancestors(&entity.id)
                        .into_iter()
                        .map(|a| a.label.as_str())
                        .collect();
                    info.insert("path".into(), json!(path));
                }
                Some(&entity.attributes)
            }
            None => input.records.first(),
        };

        for field in &params.fields {
            let value = attributes
                .and_then(|a| a.get(field))
                .cloned()
                .unwrap_or(Value::Null);
            info.insert(field.clone(), value);
        }
        Ok(Value::Object(info))
    }
}
