//! Shared state of one run.
//!
//! Sources and hierarchies are loaded at most once per run, whichever group
//! or plugin asks first. Both caches are keyed by the serialized definition,
//! so two groups naming the same source share the records.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{HierarchySpec, ImportConfig, SourceRef};
use crate::error::{EngineError, EngineResult, WidgetError};
use crate::hierarchy::{build_hierarchy, rows_from_records, Hierarchy};
use crate::models::Record;
use crate::plugins::PluginRegistry;
use crate::store::Store;

pub struct RunContext {
    store: Arc<Store>,
    registry: Arc<PluginRegistry>,
    import: Arc<ImportConfig>,
    sources: Mutex<HashMap<String, Arc<Vec<Record>>>>,
    hierarchies: Mutex<HashMap<String, Arc<Hierarchy>>>,
}

impl RunContext {
    pub fn new(store: Arc<Store>, registry: Arc<PluginRegistry>, import: Arc<ImportConfig>) -> Self {
        Self {
            store,
            registry,
            import,
            sources: Mutex::new(HashMap::new()),
            hierarchies: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Records of a source, through its loader plugin.
    pub async fn load_source(&self, source: &SourceRef) -> EngineResult<Arc<Vec<Record>>> {
        let def = self
            .import
            .resolve(source)
            .ok_or_else(|| EngineError::UnknownSource(source.label()))?;
        let key = serde_json::to_string(def).unwrap_or_else(|_| source.label());

        // Held across the load: concurrent groups wait instead of loading twice.
        let mut cache = self.sources.lock().await;
        if let Some(records) = cache.get(&key) {
            return Ok(records.clone());
        }

        let failed = |error: WidgetError| EngineError::Source {
            source_name: source.label(),
            error,
        };
        let loader = self.registry.loader(&def.loader).map_err(|e| failed(e.into()))?;
        let records = Arc::new(loader.load(&self.store, &def.params).await.map_err(failed)?);

        tracing::debug!(source = %source.label(), records = records.len(), "source loaded");
        cache.insert(key, records.clone());
        Ok(records)
    }

    /// Hierarchy built from a source with the given field mapping.
    pub async fn hierarchy(&self, spec: &HierarchySpec) -> EngineResult<Arc<Hierarchy>> {
        let key = spec.cache_key();
        let mut cache = self.hierarchies.lock().await;
        if let Some(hierarchy) = cache.get(&key) {
            return Ok(hierarchy.clone());
        }

        let records = self.load_source(&spec.source).await?;
        let hierarchy = Arc::new(build_hierarchy(rows_from_records(&records, spec)?)?);

        tracing::debug!(source = %spec.source.label(), entities = hierarchy.len(), "hierarchy built");
        cache.insert(key, hierarchy.clone());
        Ok(hierarchy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin;
    use crate::store::memory_store;
    use serde_json::json;

    async fn context(import: &str) -> RunContext {
        let mut registry = PluginRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        RunContext::new(
            Arc::new(memory_store().await),
            Arc::new(registry),
            Arc::new(serde_yaml::from_str(import).unwrap()),
        )
    }

    const IMPORT: &str = r#"
sources:
  taxonomy:
    loader: inline
    params:
      records:
        - { id: "1", parent_id: null, rank: family, label: Moraceae }
        - { id: "2", parent_id: "1", rank: genus, label: Ficus }
  broken: { loader: table, params: { table: does_not_exist } }
  alien: { loader: csv }
"#;

    #[tokio::test]
    async fn test_load_source_is_cached() {
        let run = context(IMPORT).await;
        let first = run.load_source(&SourceRef::Named("taxonomy".into())).await.unwrap();
        let second = run.load_source(&SourceRef::Named("taxonomy".into())).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_load_source_errors() {
        let run = context(IMPORT).await;

        let err = run.load_source(&SourceRef::Named("nope".into())).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownSource(ref n) if n == "nope"));

        let err = run.load_source(&SourceRef::Named("broken".into())).await.unwrap_err();
        assert!(matches!(err, EngineError::Source { ref source_name, .. } if source_name == "broken"));

        let err = run.load_source(&SourceRef::Named("alien".into())).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PluginNotFound);
    }

    #[tokio::test]
    async fn test_hierarchy_from_named_source() {
        let run = context(IMPORT).await;
        let spec = HierarchySpec::with_source(SourceRef::Named("taxonomy".into()));
        let hierarchy = run.hierarchy(&spec).await.unwrap();
        assert_eq!(hierarchy.len(), 2);
        assert_eq!(hierarchy.ancestor_at_rank("2", "family").unwrap().label, "Moraceae");

        let again = run.hierarchy(&spec).await.unwrap();
        assert!(Arc::ptr_eq(&hierarchy, &again));

        let cyclic = json!({ "loader": "inline", "params": { "records": [
            { "id": "a", "parent_id": "b", "rank": "r", "label": "a" },
            { "id": "b", "parent_id": "a", "rank": "r", "label": "b" }
        ] } });
        let spec = HierarchySpec::with_source(serde_json::from_value(cyclic).unwrap());
        let err = run.hierarchy(&spec).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CyclicHierarchy);
    }
}
