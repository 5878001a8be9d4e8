//! Shared, rebuildable entity table.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::{build_hierarchy, Hierarchy, HierarchyRow};
use crate::error::EngineResult;
use crate::store::Store;

/// The current hierarchy of one name, readable concurrently.
///
/// A rebuild holds the write lock from the first row to the stored commit:
/// readers see either the old table or the new one, never a mix. A failed
/// rebuild leaves both the in-memory and the stored table untouched.
pub struct EntityTable {
    name: String,
    current: RwLock<Arc<Hierarchy>>,
}

impl EntityTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            current: RwLock::new(Arc::new(Hierarchy::default())),
        }
    }

    /// Load the stored table of `name`.
    pub async fn open(name: &str, store: &Store) -> EngineResult<Self> {
        let entities = store.read_entities(name).await?;
        Ok(Self {
            name: name.to_string(),
            current: RwLock::new(Arc::new(Hierarchy::from_entities(entities))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn snapshot(&self) -> Arc<Hierarchy> {
        self.current.read().await.clone()
    }

    /// Rebuild from scratch and persist in one transaction.
    pub async fn rebuild(&self, rows: Vec<HierarchyRow>, store: &Store) -> EngineResult<Arc<Hierarchy>> {
        let mut current = self.current.write().await;
        let hierarchy = Arc::new(build_hierarchy(rows)?);
        store.write_entities(&self.name, hierarchy.entities()).await?;
        tracing::info!(hierarchy = %self.name, entities = hierarchy.len(), "entity table rebuilt");
        *current = hierarchy.clone();
        Ok(hierarchy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, HierarchyError};
    use crate::store::memory_store;

    #[tokio::test]
    async fn test_rebuild_replaces_and_persists() {
        let store = memory_store().await;
        let table = EntityTable::new("taxonomy");
        assert!(table.snapshot().await.is_empty());

        let before = table.snapshot().await;
        table
            .rebuild(
                vec![
                    HierarchyRow::new("1", None, "family"),
                    HierarchyRow::new("2", Some("1"), "genus"),
                ],
                &store,
            )
            .await
            .unwrap();

        // Earlier snapshots are unaffected.
        assert!(before.is_empty());
        let after = table.snapshot().await;
        assert_eq!(after.get("1").unwrap().right, 4);

        let reopened = EntityTable::open("taxonomy", &store).await.unwrap();
        assert_eq!(reopened.snapshot().await.entities(), after.entities());
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_table() {
        let store = memory_store().await;
        let table = EntityTable::new("taxonomy");
        table
            .rebuild(vec![HierarchyRow::new("1", None, "family")], &store)
            .await
            .unwrap();

        let err = table
            .rebuild(vec![HierarchyRow::new("x", Some("x"), "genus")], &store)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Hierarchy(HierarchyError::CyclicHierarchy { .. })));
        assert_eq!(table.snapshot().await.len(), 1);
        assert_eq!(store.read_entities("taxonomy").await.unwrap().len(), 1);
    }
}
