//! Configuration documents.
//!
//! Three declarative documents drive a project:
//!
//! - `import.yml` - named data sources (which loader, which parameters)
//! - `transform.yml` - groups, joins, hierarchies and widgets
//! - `export.yml` - exporters and the widget plugins that render results
//!
//! Documents are YAML; JSON is accepted too since YAML is a superset.
//!
//! ```yaml
//! # transform.yml
//! - group_by: taxon
//!   identifier: taxon_ref_id
//!   source: occurrences
//!   hierarchy:
//!     source: taxonomy
//!   widgets:
//!     top_families:
//!       plugin: top_ranking
//!       params: { field: taxon_ref_id, count: 10, mode: hierarchical, target_rank: family }
//! ```

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

fn empty_params() -> Value {
    Value::Object(Default::default())
}

// =============================================================================
// Sources
// =============================================================================

/// A loader invocation producing records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    /// Loader plugin name
    pub loader: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

/// Reference to a source: a name declared in `import.yml` or an inline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Named(String),
    Inline(SourceDef),
}

impl SourceRef {
    /// Short label for logs and error messages.
    pub fn label(&self) -> String {
        match self {
            SourceRef::Named(name) => name.clone(),
            SourceRef::Inline(def) => format!("<{}>", def.loader),
        }
    }
}

/// `import.yml`: named sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub sources: IndexMap<String, SourceDef>,
}

impl ImportConfig {
    /// Resolve a reference to a concrete loader definition.
    pub fn resolve<'a>(&'a self, source: &'a SourceRef) -> Option<&'a SourceDef> {
        match source {
            SourceRef::Named(name) => self.sources.get(name),
            SourceRef::Inline(def) => Some(def),
        }
    }
}

// =============================================================================
// Transform document
// =============================================================================

/// Join semantics for auxiliary sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Left,
    Inner,
}

/// Attach an auxiliary source to every primary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub source: SourceRef,
    /// Field of the primary record
    pub key: String,
    /// Field of the auxiliary record (defaults to `key`)
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub join_type: JoinType,
    /// Prepended to auxiliary field names
    #[serde(default)]
    pub prefix: String,
}

impl JoinSpec {
    pub fn foreign_key(&self) -> &str {
        self.foreign_key.as_deref().unwrap_or(&self.key)
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_parent_field() -> String {
    "parent_id".to_string()
}

fn default_rank_field() -> String {
    "rank".to_string()
}

fn default_label_field() -> String {
    "label".to_string()
}

/// Where a hierarchy comes from and which fields encode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchySpec {
    pub source: SourceRef,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_parent_field")]
    pub parent_field: String,
    #[serde(default = "default_rank_field")]
    pub rank_field: String,
    #[serde(default = "default_label_field")]
    pub label_field: String,
    /// Optional integer field ordering siblings before rank/label
    #[serde(default)]
    pub order_field: Option<String>,
}

impl HierarchySpec {
    pub fn with_source(source: SourceRef) -> Self {
        Self {
            source,
            id_field: default_id_field(),
            parent_field: default_parent_field(),
            rank_field: default_rank_field(),
            label_field: default_label_field(),
            order_field: None,
        }
    }

    /// Stable cache key: same source + same mapping → same hierarchy.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.source.label())
    }
}

/// One plugin invocation inside a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    pub plugin: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

/// A widget: either a single `plugin` + `params` or a list of `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default)]
    pub steps: Vec<TransformStep>,
    /// Widgets of the same group whose results must exist first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// A failure aborts the rest of the group
    #[serde(default)]
    pub required: bool,
}

impl WidgetConfig {
    pub fn single(plugin: &str, params: Value) -> Self {
        Self {
            plugin: Some(plugin.to_string()),
            params,
            steps: Vec::new(),
            depends_on: Vec::new(),
            required: false,
        }
    }

    pub fn depends_on(mut self, widgets: &[&str]) -> Self {
        self.depends_on = widgets.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Steps in execution order.
    pub fn steps(&self) -> Vec<TransformStep> {
        match &self.plugin {
            Some(plugin) => {
                let mut steps = vec![TransformStep {
                    plugin: plugin.clone(),
                    params: self.params.clone(),
                }];
                steps.extend(self.steps.iter().cloned());
                steps
            }
            None => self.steps.clone(),
        }
    }
}

/// A transform block targeting one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub group_by: String,
    /// Field of the primary records holding the entity id
    pub identifier: String,
    pub source: SourceRef,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub hierarchy: Option<HierarchySpec>,
    #[serde(default)]
    pub widgets: IndexMap<String, WidgetConfig>,
}

/// `transform.yml`: a list of groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformConfig {
    pub groups: Vec<GroupConfig>,
}

impl TransformConfig {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn group(&self, group_by: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.group_by == group_by)
    }
}

// =============================================================================
// Export document
// =============================================================================

/// A rendered widget inside an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportWidget {
    /// Widget plugin name
    pub plugin: String,
    /// Transform widget whose result feeds the renderer
    pub data_source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "empty_params")]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportGroup {
    pub group_by: String,
    #[serde(default)]
    pub widgets: Vec<ExportWidget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTarget {
    pub name: String,
    /// Exporter plugin name
    pub exporter: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default)]
    pub groups: Vec<ExportGroup>,
}

/// `export.yml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub exports: Vec<ExportTarget>,
}

// =============================================================================
// Project
// =============================================================================

/// The three documents of a project.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub import: ImportConfig,
    pub transform: TransformConfig,
    pub export: ExportConfig,
}

impl ProjectConfig {
    /// Load `import`, `transform` and `export` documents from a directory.
    ///
    /// `transform` is mandatory, the other two default to empty.
    pub fn load(dir: &Path) -> ConfigResult<Self> {
        let transform = read_document(dir, "transform")?
            .ok_or_else(|| ConfigError::Missing(dir.join("transform.yml")))?;
        Ok(Self {
            import: read_document(dir, "import")?.unwrap_or_default(),
            transform,
            export: read_document(dir, "export")?.unwrap_or_default(),
        })
    }
}

/// Locate `<stem>.yml`, `<stem>.yaml` or `<stem>.json` in `dir`.
fn find_document(dir: &Path, stem: &str) -> Option<PathBuf> {
    ["yml", "yaml", "json"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|p| p.is_file())
}

fn read_document<T: DeserializeOwned>(dir: &Path, stem: &str) -> ConfigResult<Option<T>> {
    let Some(path) = find_document(dir, stem) else {
        return Ok(None);
    };
    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let doc = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path,
        message: e.to_string(),
    })?;
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const TRANSFORM: &str = r#"
- group_by: taxon
  identifier: taxon_ref_id
  source: occurrences
  joins:
    - source: { loader: table, params: { table: plots } }
      key: plot_id
      foreign_key: id
      join_type: inner
      prefix: "plot_"
  hierarchy:
    source: taxonomy
    label_field: full_name
  widgets:
    general_info:
      plugin: entity_info
    top_families:
      steps:
        - plugin: top_ranking
          params: { field: taxon_ref_id, count: 10 }
      depends_on: [general_info]
      required: true
"#;

    #[test]
    fn test_parse_transform_document() {
        let config = TransformConfig::from_yaml(TRANSFORM).unwrap();
        let group = config.group("taxon").unwrap();

        assert_eq!(group.source, SourceRef::Named("occurrences".into()));
        assert_eq!(group.joins[0].join_type, JoinType::Inner);
        assert_eq!(group.joins[0].foreign_key(), "id");

        let hierarchy = group.hierarchy.as_ref().unwrap();
        assert_eq!(hierarchy.label_field, "full_name");
        assert_eq!(hierarchy.id_field, "id");

        let names: Vec<_> = group.widgets.keys().cloned().collect();
        assert_eq!(names, vec!["general_info", "top_families"]);

        let info = &group.widgets["general_info"];
        assert_eq!(info.steps().len(), 1);
        assert_eq!(info.params, json!({}));

        let top = &group.widgets["top_families"];
        assert!(top.required);
        assert_eq!(top.depends_on, vec!["general_info"]);
        assert_eq!(top.steps()[0].plugin, "top_ranking");
    }

    #[test]
    fn test_inline_source_ref() {
        let source: SourceRef =
            serde_yaml::from_str("{ loader: inline, params: { records: [] } }").unwrap();
        assert!(matches!(source, SourceRef::Inline(ref def) if def.loader == "inline"));
        assert_eq!(source.label(), "<inline>");
    }

    #[test]
    fn test_project_load_requires_transform() {
        let dir = tempdir().unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));

        fs::write(dir.path().join("transform.yml"), TRANSFORM).unwrap();
        fs::write(
            dir.path().join("import.json"),
            r#"{"sources": {"occurrences": {"loader": "table", "params": {"table": "occ"}}}}"#,
        )
        .unwrap();

        let project = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(project.transform.groups.len(), 1);
        assert!(project.import.sources.contains_key("occurrences"));
        assert!(project.export.exports.is_empty());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("transform.yml"), "- group_by: [unclosed").unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("transform.yml"));
    }
}
