//! Relational store adapter.
//!
//! The caller hands in an open [`SqlitePool`]; the core never owns the
//! database. It only creates its own two tables if they are missing:
//!
//! ```text
//! widget_results (group_by, entity_id, widget, value, error_kind, error_message, produced_at)
//! entities       (hierarchy, id, parent_id, label, rank, lft, rgt, level, attributes)
//! ```
//!
//! Results of a group are replaced wholesale in one transaction, under a
//! per-group lock so two writers of the same group never interleave.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, StoreError, StoreResult};
use crate::models::{Entity, ErrorMarker, Record, WidgetResult};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS widget_results (
        group_by      TEXT NOT NULL,
        entity_id     TEXT NOT NULL,
        widget        TEXT NOT NULL,
        value         TEXT,
        error_kind    TEXT,
        error_message TEXT,
        produced_at   TEXT NOT NULL,
        PRIMARY KEY (group_by, entity_id, widget)
    )",
    "CREATE TABLE IF NOT EXISTS entities (
        hierarchy  TEXT NOT NULL,
        id         TEXT NOT NULL,
        parent_id  TEXT,
        label      TEXT NOT NULL,
        rank       TEXT NOT NULL,
        lft        INTEGER NOT NULL,
        rgt        INTEGER NOT NULL,
        level      INTEGER NOT NULL,
        attributes TEXT NOT NULL,
        PRIMARY KEY (hierarchy, id)
    )",
    "CREATE INDEX IF NOT EXISTS entities_interval ON entities (hierarchy, lft, rgt)",
];

/// Number of SQLite VM steps between deadline checks in a bounded read.
const PROGRESS_STEPS: i32 = 1000;

/// Whether `name` can be spliced into SQL as a table or column name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn identifier(name: &str) -> StoreResult<&str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Access to the project database.
pub struct Store {
    pool: SqlitePool,
    group_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the result and entity tables if needed.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reading source data
    // -------------------------------------------------------------------------

    /// Run a read query with positional `?` parameters.
    pub async fn fetch_records(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Record>> {
        let mut query = sqlx::query::<Sqlite>(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Like [`Store::fetch_records`], but SQLite interrupts the statement once
    /// `timeout` has elapsed, so the connection is free again right after.
    pub async fn fetch_records_within(
        &self,
        sql: &str,
        params: &[Value],
        timeout: Duration,
    ) -> StoreResult<Vec<Record>> {
        let mut conn = self.pool.acquire().await?;
        let deadline = Instant::now() + timeout;
        conn.lock_handle()
            .await?
            .set_progress_handler(PROGRESS_STEPS, move || Instant::now() < deadline);

        let mut query = sqlx::query::<Sqlite>(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&mut *conn).await;

        let handler_removed = match conn.lock_handle().await {
            Ok(mut handle) => {
                handle.remove_progress_handler();
                true
            }
            Err(_) => false,
        };
        if !handler_removed {
            // Never hand a connection with a stale handler back to the pool.
            drop(conn.detach());
        }

        match rows {
            Ok(rows) => rows.iter().map(row_to_record).collect(),
            Err(_) if Instant::now() >= deadline => Err(StoreError::TimedOut {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Every row of `table`, optionally restricted to `columns`.
    pub async fn load_table(&self, table: &str, columns: &[String]) -> StoreResult<Vec<Record>> {
        let table = identifier(table)?;
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| identifier(c).map(|c| format!("\"{}\"", c)))
                .collect::<StoreResult<Vec<_>>>()?
                .join(", ")
        };
        let sql = format!("SELECT {} FROM \"{}\" ORDER BY rowid", projection, table);
        self.fetch_records(&sql, &[]).await
    }

    // -------------------------------------------------------------------------
    // Widget results
    // -------------------------------------------------------------------------

    fn group_lock(&self, group_by: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.group_locks.lock();
        Arc::clone(locks.entry(group_by.to_string()).or_default())
    }

    /// Replace every stored result of `group_by` with `results`.
    pub async fn persist_group(&self, group_by: &str, results: &[WidgetResult]) -> StoreResult<()> {
        let lock = self.group_lock(group_by);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM widget_results WHERE group_by = ?")
            .bind(group_by)
            .execute(&mut *tx)
            .await?;

        for result in results {
            let (value, kind, message) = match &result.error {
                None => (Some(serde_json::to_string(&result.value)?), None, None),
                Some(marker) => (None, Some(marker.kind.as_str()), Some(marker.message.as_str())),
            };
            sqlx::query(
                "INSERT INTO widget_results
                 (group_by, entity_id, widget, value, error_kind, error_message, produced_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&result.group_by)
            .bind(&result.entity_id)
            .bind(&result.widget)
            .bind(value)
            .bind(kind)
            .bind(message)
            .bind(result.produced_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(group = group_by, count = results.len(), "results persisted");
        Ok(())
    }

    /// Stored results, in write order, optionally for one group.
    pub async fn read_results(&self, group_by: Option<&str>) -> StoreResult<Vec<WidgetResult>> {
        let rows = match group_by {
            Some(group) => {
                sqlx::query("SELECT * FROM widget_results WHERE group_by = ? ORDER BY rowid")
                    .bind(group)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM widget_results ORDER BY group_by, rowid")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_result).collect()
    }

    // -------------------------------------------------------------------------
    // Entities
    // -------------------------------------------------------------------------

    /// Replace the stored entity table of `hierarchy`.
    pub async fn write_entities(&self, hierarchy: &str, entities: &[Entity]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entities WHERE hierarchy = ?")
            .bind(hierarchy)
            .execute(&mut *tx)
            .await?;

        for entity in entities {
            sqlx::query(
                "INSERT INTO entities (hierarchy, id, parent_id, label, rank, lft, rgt, level, attributes)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(hierarchy)
            .bind(&entity.id)
            .bind(&entity.parent_id)
            .bind(&entity.label)
            .bind(&entity.rank)
            .bind(i64::from(entity.left))
            .bind(i64::from(entity.right))
            .bind(i64::from(entity.level))
            .bind(serde_json::to_string(&entity.attributes)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Stored entities of `hierarchy` in interval order.
    pub async fn read_entities(&self, hierarchy: &str) -> StoreResult<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE hierarchy = ? ORDER BY lft")
            .bind(hierarchy)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<Entity> {
                let attributes: String = row.try_get("attributes")?;
                Ok(Entity {
                    id: row.try_get("id")?,
                    parent_id: row.try_get("parent_id")?,
                    label: row.try_get("label")?,
                    rank: row.try_get("rank")?,
                    left: to_u32(row.try_get("lft")?)?,
                    right: to_u32(row.try_get("rgt")?)?,
                    level: to_u32(row.try_get("level")?)?,
                    attributes: serde_json::from_str(&attributes)?,
                })
            })
            .collect()
    }
}

fn to_u32(v: i64) -> StoreResult<u32> {
    u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("interval bound {} out of range", v)))
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Convert a row using each value's runtime storage class.
fn row_to_record(row: &SqliteRow) -> StoreResult<Record> {
    let mut record = Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" | "NUMERIC" => {
                    let f = row.try_get_unchecked::<f64, _>(index)?;
                    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
                }
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn row_to_result(row: &SqliteRow) -> StoreResult<WidgetResult> {
    let produced_at: String = row.try_get("produced_at")?;
    let produced_at = DateTime::parse_from_rfc3339(&produced_at)
        .map_err(|e| StoreError::Corrupt(format!("produced_at '{}': {}", produced_at, e)))?
        .with_timezone(&Utc);

    let error_kind: Option<String> = row.try_get("error_kind")?;
    let error = match error_kind {
        None => None,
        Some(kind) => Some(ErrorMarker {
            kind: ErrorKind::parse(&kind)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown error kind '{}'", kind)))?,
            message: row.try_get::<Option<String>, _>("error_message")?.unwrap_or_default(),
        }),
    };

    let value = match row.try_get::<Option<String>, _>("value")? {
        Some(text) => serde_json::from_str(&text)?,
        None => Value::Null,
    };

    Ok(WidgetResult {
        group_by: row.try_get("group_by")?,
        entity_id: row.try_get("entity_id")?,
        widget: row.try_get("widget")?,
        value,
        produced_at,
        error,
    })
}

/// Store over a fresh single-connection in-memory database.
#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = Store::new(pool);
    store.ensure_schema().await.unwrap();
    store
}
