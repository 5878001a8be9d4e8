//! High-level project API: validate, run, rebuild hierarchies, export.
//!
//! # Example
//!
//! ```rust,ignore
//! use canopy::plugins::{global, PluginLoader};
//! use canopy::transform::Pipeline;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::SqlitePool::connect("sqlite://canopy.db").await?;
//!     global::load(PluginLoader::new(vec!["plugins".into()]));
//!     let pipeline = Pipeline::open(Path::new("config"), pool, global::snapshot()).await?;
//!
//!     let summary = pipeline.run(None).await?;
//!     println!("{}", summary);
//!     std::process::exit(summary.exit_code());
//! }
//! ```

use indexmap::IndexMap;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use super::context::RunContext;
use super::engine::TransformEngine;
use super::summary::RunSummary;
use crate::config::ProjectConfig;
use crate::error::{EngineError, PipelineError, PipelineResult};
use crate::hierarchy::{rows_from_records, EntityTable, Hierarchy};
use crate::logs::{log_info, log_success, log_warning};
use crate::models::WidgetResult;
use crate::plugins::{ExportOutcome, PluginRegistry};
use crate::store::Store;
use crate::validation::{ConfigValidator, ValidationReport};

/// A loaded project bound to a registry and a store.
pub struct Pipeline {
    project: ProjectConfig,
    registry: Arc<PluginRegistry>,
    store: Arc<Store>,
}

impl Pipeline {
    pub fn new(project: ProjectConfig, registry: Arc<PluginRegistry>, store: Arc<Store>) -> Self {
        Self {
            project,
            registry,
            store,
        }
    }

    /// Read the configuration documents of `config_dir` and prepare the store.
    pub async fn open(config_dir: &Path, pool: SqlitePool, registry: Arc<PluginRegistry>) -> PipelineResult<Self> {
        let project = ProjectConfig::load(config_dir)?;
        let store = Store::new(pool);
        store.ensure_schema().await?;
        Ok(Self::new(project, registry, Arc::new(store)))
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn validate(&self) -> ValidationReport {
        ConfigValidator::new(&self.registry).validate(&self.project)
    }

    /// Validate, then run one group or all of them.
    pub async fn run(&self, group: Option<&str>) -> PipelineResult<RunSummary> {
        self.validate().into_result().map_err(PipelineError::InvalidConfig)?;
        let engine = TransformEngine::new(&self.project, self.registry.clone(), self.store.clone());
        Ok(engine.run(group).await?)
    }

    /// Rebuild and store the entity table of a hierarchy-aware group.
    pub async fn rebuild_hierarchy(&self, group: &str) -> PipelineResult<Arc<Hierarchy>> {
        let config = self
            .project
            .transform
            .group(group)
            .ok_or_else(|| EngineError::UnknownGroup(group.to_string()))?;
        let spec = config
            .hierarchy
            .as_ref()
            .ok_or_else(|| PipelineError::NoHierarchy(group.to_string()))?;

        let context = RunContext::new(
            self.store.clone(),
            self.registry.clone(),
            Arc::new(self.project.import.clone()),
        );
        let records = context.load_source(&spec.source).await?;
        let rows = rows_from_records(&records, spec)?;

        let table = EntityTable::open(group, &self.store).await?;
        let hierarchy = table.rebuild(rows, &self.store).await?;
        log_success(format!("Hierarchy '{}': {} entities", group, hierarchy.len()));
        Ok(hierarchy)
    }

    /// Publish persisted results through one export target, or all of them.
    pub async fn export(&self, target: Option<&str>) -> PipelineResult<Vec<(String, ExportOutcome)>> {
        let targets: Vec<_> = match target {
            Some(name) => vec![self
                .project
                .export
                .exports
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| PipelineError::UnknownTarget(name.to_string()))?],
            None => self.project.export.exports.iter().collect(),
        };

        let mut results: IndexMap<String, Vec<WidgetResult>> = IndexMap::new();
        for result in self.store.read_results(None).await? {
            results.entry(result.group_by.clone()).or_default().push(result);
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            log_info(format!("Export '{}' with {}", target.name, target.exporter));
            let exporter = self.registry.exporter(&target.exporter)?;
            let outcome = exporter.export(target, &results, &self.registry)?;
            if !outcome.warnings.is_empty() {
                log_warning(format!("Export '{}': {} warning(s)", target.name, outcome.warnings.len()));
            }
            outcomes.push((target.name.clone(), outcome));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin;
    use crate::store::memory_store;
    use std::fs;
    use tempfile::tempdir;

    const IMPORT: &str = r#"
sources:
  occurrences:
    loader: inline
    params:
      records:
        - { taxon: S1, dbh: 10 }
        - { taxon: S1, dbh: 20 }
  taxonomy:
    loader: inline
    params:
      records:
        - { id: G, parent_id: null, rank: genus, label: Ficus }
        - { id: S1, parent_id: G, rank: species, label: Ficus alba }
"#;

    const TRANSFORM: &str = r#"
- group_by: taxon
  identifier: taxon
  source: occurrences
  hierarchy: { source: taxonomy }
  widgets:
    dbh: { plugin: field_stats, params: { field: dbh } }
"#;

    async fn pipeline(transform: &str, export: &str) -> Pipeline {
        let mut registry = PluginRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        let project = ProjectConfig {
            import: serde_yaml::from_str(IMPORT).unwrap(),
            transform: crate::config::TransformConfig::from_yaml(transform).unwrap(),
            export: serde_yaml::from_str(export).unwrap(),
        };
        Pipeline::new(project, Arc::new(registry), Arc::new(memory_store().await))
    }

    #[tokio::test]
    async fn test_invalid_config_never_runs() {
        let pipeline = pipeline(
            "- { group_by: taxon, identifier: taxon, source: occurrences, widgets: { x: { plugin: nope } } }",
            "{}",
        )
        .await;
        let err = pipeline.run(None).await.unwrap_err();
        match err {
            PipelineError::InvalidConfig(report) => assert_eq!(report.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(pipeline.store().read_results(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_then_export() {
        let out = tempdir().unwrap();
        let export = format!(
            "exports:\n  - {{ name: site, exporter: json_files, params: {{ output_dir: '{}' }} }}\n",
            out.path().display()
        );
        let pipeline = pipeline(TRANSFORM, &export).await;

        let summary = pipeline.run(None).await.unwrap();
        assert_eq!(summary.exit_code(), 0);

        let outcomes = pipeline.export(None).await.unwrap();
        assert_eq!(outcomes[0].1.files.len(), 2);
        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.path().join("taxon").join("G.json")).unwrap()).unwrap();
        assert_eq!(doc["dbh"]["count"], serde_json::json!(2));

        let err = pipeline.export(Some("print")).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn test_rebuild_hierarchy_persists_entities() {
        let taxa = pipeline(TRANSFORM, "{}").await;
        let hierarchy = taxa.rebuild_hierarchy("taxon").await.unwrap();
        assert_eq!(hierarchy.len(), 2);

        let stored = taxa.store().read_entities("taxon").await.unwrap();
        assert_eq!(stored[0].id, "G");
        assert_eq!((stored[1].left, stored[1].right), (2, 3));

        let flat = pipeline(
            "- { group_by: plot, identifier: plot, source: occurrences }",
            "{}",
        )
        .await;
        assert!(matches!(
            flat.rebuild_hierarchy("plot").await.unwrap_err(),
            PipelineError::NoHierarchy(_)
        ));
    }
}
