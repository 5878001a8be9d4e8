//! Bundled loaders.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::WidgetError;
use crate::models::Record;
use crate::plugins::Loader;
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct TableParams {
    table: String,
    #[serde(default)]
    columns: Vec<String>,
}

/// Rows of one store table.
pub struct TableLoader;

#[async_trait]
impl Loader for TableLoader {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["table"],
            "properties": {
                "table": { "type": "string", "pattern": "^[A-Za-z_][A-Za-z0-9_]*$" },
                "columns": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    async fn load(&self, store: &Store, params: &Value) -> Result<Vec<Record>, WidgetError> {
        let params: TableParams = serde_json::from_value(params.clone()).map_err(WidgetError::params)?;
        Ok(store.load_table(&params.table, &params.columns).await?)
    }
}

/// Records written directly in configuration.
pub struct InlineLoader;

#[async_trait]
impl Loader for InlineLoader {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["records"],
            "properties": {
                "records": { "type": "array", "items": { "type": "object" } }
            }
        })
    }

    async fn load(&self, _store: &Store, params: &Value) -> Result<Vec<Record>, WidgetError> {
        let records = params
            .get("records")
            .and_then(Value::as_array)
            .ok_or_else(|| WidgetError::InvalidParams("'records' must be a list".into()))?;
        records
            .iter()
            .map(|r| {
                r.as_object()
                    .cloned()
                    .ok_or_else(|| WidgetError::InvalidParams("every record must be an object".into()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store;

    #[tokio::test]
    async fn test_table_loader() {
        let store = memory_store().await;
        sqlx::query("CREATE TABLE plots (id INTEGER, name TEXT)")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO plots VALUES (1, 'P1'), (2, 'P2')")
            .execute(store.pool())
            .await
            .unwrap();

        let records = TableLoader
            .load(&store, &json!({ "table": "plots", "columns": ["name"] }))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["name"], json!("P2"));
        assert!(!records[0].contains_key("id"));

        let err = TableLoader.load(&store, &json!({})).await.unwrap_err();
        assert!(matches!(err, WidgetError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_inline_loader() {
        let store = memory_store().await;
        let records = InlineLoader
            .load(&store, &json!({ "records": [{ "id": 1 }, { "id": 2 }] }))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);

        let err = InlineLoader
            .load(&store, &json!({ "records": [1] }))
            .await
            .unwrap_err();
        assert!(matches!(err, WidgetError::InvalidParams(_)));
    }
}
