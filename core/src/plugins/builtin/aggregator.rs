//! `database_aggregator`: named read-only queries plus computed fields.
//!
//! ```yaml
//! plugin: database_aggregator
//! params:
//!   timeout_ms: 5000
//!   queries:
//!     occurrences: { template: count_rows, template_params: { table: occurrences }, format: scalar }
//!     mine:        { sql: "SELECT COUNT(*) FROM occurrences WHERE taxon_ref_id = {entity_id}", format: scalar }
//!   computed_fields:
//!     share: { expression: "mine / max(occurrences, 1)", dependencies: [mine, occurrences] }
//! ```
//!
//! Queries run in declaration order, then computed fields in declaration
//! order. The output maps every query and field name to its value. The
//! first failure fails the whole widget.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::sql::{bind_entity, validate_sql, SqlTemplates};
use crate::error::{StoreError, WidgetError};
use crate::expression::Expression;
use crate::models::Record;
use crate::plugins::{Transformer, WidgetInput};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// How a query's rows become a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFormat {
    /// First column of the first row (null without rows)
    Scalar,
    /// List of row objects
    #[default]
    Table,
    /// One list per column: `{column: [values...]}`
    Series,
    /// The first row object (null without rows)
    SingleRow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySpec {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub template_params: Map<String, Value>,
    #[serde(default)]
    pub format: QueryFormat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputedField {
    pub expression: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorParams {
    #[serde(default)]
    pub queries: IndexMap<String, QuerySpec>,
    #[serde(default)]
    pub templates: IndexMap<String, String>,
    #[serde(default)]
    pub computed_fields: IndexMap<String, ComputedField>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl AggregatorParams {
    /// Resolve a query to checked SQL.
    fn query_sql(&self, name: &str, spec: &QuerySpec, templates: &SqlTemplates) -> Result<String, WidgetError> {
        let sql = match (&spec.sql, &spec.template) {
            (Some(sql), None) => sql.clone(),
            (None, Some(template)) => templates.render(template, &spec.template_params)?,
            _ => {
                return Err(WidgetError::InvalidParams(format!(
                    "query '{}' needs exactly one of 'sql' or 'template'",
                    name
                )))
            }
        };
        validate_sql(&sql)?;
        Ok(sql)
    }
}

/// Shape rows according to `format`.
pub fn format_rows(rows: Vec<Record>, format: QueryFormat) -> Value {
    match format {
        QueryFormat::Scalar => rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().map(|(_, v)| v))
            .unwrap_or(Value::Null),
        QueryFormat::Table => Value::Array(rows.into_iter().map(Value::Object).collect()),
        QueryFormat::Series => {
            let mut series: Map<String, Value> = Map::new();
            for row in rows {
                for (column, value) in row {
                    if let Value::Array(values) = series.entry(column).or_insert_with(|| json!([])) {
                        values.push(value);
                    }
                }
            }
            Value::Object(series)
        }
        QueryFormat::SingleRow => rows
            .into_iter()
            .next()
            .map(Value::Object)
            .unwrap_or(Value::Null),
    }
}

pub struct DatabaseAggregator;

#[async_trait]
impl Transformer for DatabaseAggregator {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["queries"],
            "properties": {
                "queries": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "properties": {
                            "sql": { "type": "string" },
                            "template": { "type": "string" },
                            "template_params": { "type": "object" },
                            "format": { "enum": ["scalar", "table", "series", "single_row"] }
                        },
                        "additionalProperties": false
                    }
                },
                "templates": {
                    "type": "object",
                    "additionalProperties": { "type": "string" }
                },
                "computed_fields": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "required": ["expression"],
                        "properties": {
                            "expression": { "type": "string" },
                            "dependencies": { "type": "array", "items": { "type": "string" } }
                        },
                        "additionalProperties": false
                    }
                },
                "timeout_ms": { "type": "integer", "minimum": 1 }
            }
        })
    }

    async fn transform(&self, input: &WidgetInput<'_>, params: &Value) -> Result<Value, WidgetError> {
        let params: AggregatorParams = serde_json::from_value(params.clone()).map_err(WidgetError::params)?;
        let templates = SqlTemplates::with_overrides(&params.templates);

        for name in params.computed_fields.keys() {
            if params.queries.contains_key(name) {
                return Err(WidgetError::InvalidParams(format!(
                    "computed field '{}' shadows a query of the same name",
                    name
                )));
            }
        }

        // Check everything before touching the store.
        let mut prepared = Vec::with_capacity(params.queries.len());
        for (name, spec) in &params.queries {
            let sql = params.query_sql(name, spec, &templates)?;
            prepared.push((name, bind_entity(&sql), spec.format));
        }
        let mut expressions = Vec::with_capacity(params.computed_fields.len());
        for (name, field) in &params.computed_fields {
            let expression = Expression::parse(&field.expression).map_err(|source| WidgetError::Expression {
                field: name.clone(),
                source,
            })?;
            expressions.push((name, expression, &field.dependencies));
        }

        let store = input.run.store();
        let timeout = Duration::from_millis(params.timeout_ms);
        let mut output: IndexMap<String, Value> = IndexMap::new();

        for (name, (sql, binds), format) in prepared {
            let args = vec![Value::String(input.entity_id.to_string()); binds];
            let rows = store
                .fetch_records_within(&sql, &args, timeout)
                .await
                .map_err(|e| match e {
                    StoreError::TimedOut { .. } => WidgetError::QueryTimeout {
                        query: name.clone(),
                        timeout_ms: params.timeout_ms,
                    },
                    other => WidgetError::Store(other),
                })?;
            tracing::debug!(query = %name, rows = rows.len(), "aggregator query done");
            output.insert(name.clone(), format_rows(rows, format));
        }

        for (name, expression, dependencies) in expressions {
            // Own results first, then upstream widgets.
            let mut available = output.clone();
            for (widget, value) in input.dependencies {
                available.entry(widget.clone()).or_insert_with(|| value.clone());
            }
            let value = expression
                .evaluate_with_dependencies(dependencies, &available)
                .map_err(|source| WidgetError::Expression {
                    field: name.clone(),
                    source,
                })?;
            output.insert(name.clone(), value);
        }

        Ok(Value::Object(output.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ExpressionError};
    use crate::plugins::builtin::testing::Harness;

    async fn harness() -> Harness {
        let harness = Harness::new().await;
        let pool = harness.store().pool().clone();
        sqlx::query("CREATE TABLE occurrences (id INTEGER, taxon_ref_id TEXT, dbh REAL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO occurrences VALUES (1, 'E1', 10), (2, 'E1', 20), (3, 'T2', 5), (4, 'T3', 7)",
        )
        .execute(&pool)
        .await
        .unwrap();
        harness
    }

    #[tokio::test]
    async fn test_queries_and_computed_fields() {
        let harness = harness().await;
        let params = json!({
            "queries": {
                "total": { "template": "count_rows", "template_params": { "table": "occurrences" }, "format": "scalar" },
                "mine": { "sql": "SELECT COUNT(*) AS n FROM occurrences WHERE taxon_ref_id = {entity_id}", "format": "scalar" },
                "top": { "sql": "SELECT id, dbh FROM occurrences WHERE taxon_ref_id = {entity_id} ORDER BY dbh DESC", "format": "single_row" },
                "dbh": { "sql": "SELECT dbh FROM occurrences ORDER BY id", "format": "series" }
            },
            "computed_fields": {
                "share": { "expression": "mine / total", "dependencies": ["mine", "total"] },
                "percent": { "expression": "round(share * 100)", "dependencies": ["share"] }
            }
        });

        let out = harness.transform(&DatabaseAggregator, &[], &params).await.unwrap();
        assert_eq!(out["total"], json!(4));
        assert_eq!(out["mine"], json!(2));
        assert_eq!(out["top"], json!({ "id": 2, "dbh": 20.0 }));
        assert_eq!(out["dbh"], json!({ "dbh": [10.0, 20.0, 5.0, 7.0] }));
        assert_eq!(out["share"], json!(0.5));
        assert_eq!(out["percent"], json!(50));

        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["total", "mine", "top", "dbh", "share", "percent"]);
    }

    #[tokio::test]
    async fn test_computed_field_with_two_dependencies() {
        let harness = harness().await;
        let params = json!({
            "queries": {
                "a": { "sql": "SELECT 2", "format": "scalar" },
                "b": { "sql": "SELECT 3", "format": "scalar" }
            },
            "computed_fields": { "c": { "expression": "a + b", "dependencies": ["a", "b"] } }
        });
        let out = harness.transform(&DatabaseAggregator, &[], &params).await.unwrap();
        assert_eq!(out["c"], json!(5));
    }

    #[tokio::test]
    async fn test_undeclared_dependency_fails_widget() {
        let harness = harness().await;
        let params = json!({
            "queries": {
                "a": { "sql": "SELECT 2", "format": "scalar" },
                "b": { "sql": "SELECT 3", "format": "scalar" }
            },
            "computed_fields": { "c": { "expression": "a + b", "dependencies": ["a"] } }
        });
        let err = harness.transform(&DatabaseAggregator, &[], &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingDependency);
        assert!(matches!(
            err,
            WidgetError::Expression { source: ExpressionError::MissingDependency(ref name), .. } if name == "b"
        ));
    }

    #[tokio::test]
    async fn test_upstream_widget_results_are_available() {
        let harness = harness().await;
        let mut upstream = IndexMap::new();
        upstream.insert("general".to_string(), json!({ "area": 4 }));
        let params = json!({
            "queries": { "n": { "sql": "SELECT 8", "format": "scalar" } },
            "computed_fields": { "density": { "expression": "n / general.area", "dependencies": ["n", "general"] } }
        });
        let out = harness
            .transform_with_dependencies(&DatabaseAggregator, &upstream, &params)
            .await
            .unwrap();
        assert_eq!(out["density"], json!(2.0));
    }

    #[tokio::test]
    async fn test_rejected_sql_never_runs() {
        let harness = harness().await;
        let params = json!({
            "queries": {
                "ok": { "sql": "SELECT 1", "format": "scalar" },
                "bad": { "sql": "DELETE FROM occurrences", "format": "scalar" }
            }
        });
        let err = harness.transform(&DatabaseAggregator, &[], &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SqlValidation);

        let rows = harness
            .store()
            .fetch_records("SELECT COUNT(*) AS n FROM occurrences", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], json!(4));
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let harness = harness().await;
        let params = json!({
            "timeout_ms": 1,
            "queries": {
                "slow": {
                    "sql": "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000) SELECT COUNT(*) FROM c",
                    "format": "scalar"
                }
            }
        });
        let err = harness.transform(&DatabaseAggregator, &[], &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueryTimeout);
    }

    #[tokio::test]
    async fn test_timed_out_query_does_not_block_later_queries() {
        let harness = harness().await;
        let endless = json!({
            "timeout_ms": 50,
            "queries": {
                "slow": {
                    "sql": "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) FROM c",
                    "format": "scalar"
                }
            }
        });
        for _ in 0..3 {
            let err = harness.transform(&DatabaseAggregator, &[], &endless).await.unwrap_err();
            assert!(matches!(err, WidgetError::QueryTimeout { timeout_ms: 50, .. }));
        }

        let quick = json!({
            "queries": { "n": { "sql": "SELECT COUNT(*) FROM occurrences", "format": "scalar" } }
        });
        let out = tokio::time::timeout(
            Duration::from_secs(2),
            harness.transform(&DatabaseAggregator, &[], &quick),
        )
        .await
        .expect("store still busy after timeout")
        .unwrap();
        assert_eq!(out["n"], json!(4));
    }

    #[tokio::test]
    async fn test_query_needs_sql_or_template() {
        let harness = harness().await;
        let params = json!({ "queries": { "none": { "format": "scalar" } } });
        let err = harness.transform(&DatabaseAggregator, &[], &params).await.unwrap_err();
        assert!(matches!(err, WidgetError::InvalidParams(_)));
    }

    #[test]
    fn test_format_rows_empty() {
        assert_eq!(format_rows(vec![], QueryFormat::Scalar), Value::Null);
        assert_eq!(format_rows(vec![], QueryFormat::Table), json!([]));
        assert_eq!(format_rows(vec![], QueryFormat::Series), json!({}));
        assert_eq!(format_rows(vec![], QueryFormat::SingleRow), Value::Null);
    }
}
