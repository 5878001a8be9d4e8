//! Configuration validation.
//!
//! Two layers:
//!
//! - [`validate`] / [`is_valid`] - JSON Schema (draft 7) checks of one value
//! - [`ConfigValidator`] - checks the three project documents against the
//!   plugin registry and collects every issue it finds
//!
//! The validator never stops at the first problem; each [`ConfigIssue`]
//! carries the path of the offending entry so all of them can be fixed in
//! one pass.
//!
//! ```text
//! transform.taxon.widgets.top_families.steps[0]  PluginNotFoundError  transformer plugin 'top_rank' not found
//! transform.taxon.widgets.map.depends_on         ConfigurationError   unknown widget 'gps'
//! ```

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::config::{ImportConfig, ProjectConfig, SourceRef, WidgetConfig};
use crate::error::ErrorKind;
use crate::plugins::{PluginKind, PluginRegistry};

/// Validate a JSON value against a JSON Schema.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with every error otherwise
///
/// # Example
/// ```ignore
/// use serde_json::json;
/// use canopy::validation::validate;
///
/// let schema = json!({
///     "type": "object",
///     "required": ["field"],
///     "properties": { "field": { "type": "string" } }
/// });
///
/// assert!(validate(&schema, &json!({ "field": "dbh" })).is_ok());
/// assert!(validate(&schema, &json!({ "count": 10 })).is_err());
/// ```
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Same check, yes or no.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

// =============================================================================
// Report
// =============================================================================

/// One problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigIssue {
    /// Dotted path, e.g. `transform.taxon.widgets.top_families.steps[0]`
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Every issue found, in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ConfigIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, path: impl Into<String>, kind: ErrorKind, message: impl Into<String>) {
        self.issues.push(ConfigIssue {
            path: path.into(),
            kind,
            message: message.into(),
        });
    }

    /// Issues under `prefix` (inclusive).
    pub fn at(&self, prefix: &str) -> Vec<&ConfigIssue> {
        self.issues.iter().filter(|i| i.path.starts_with(prefix)).collect()
    }

    pub fn into_result(self) -> Result<(), ValidationReport> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "  [{}] {}: {}", issue.kind, issue.path, issue.message)?;
        }
        Ok(())
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Checks project documents against a registry.
pub struct ConfigValidator<'r> {
    registry: &'r PluginRegistry,
}

impl<'r> ConfigValidator<'r> {
    pub fn new(registry: &'r PluginRegistry) -> Self {
        Self { registry }
    }

    /// Validate all three documents.
    pub fn validate(&self, project: &ProjectConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_import(&project.import, &mut report);
        self.check_transform(project, &mut report);
        self.check_export(project, &mut report);
        report
    }

    /// Plugin exists with this kind and `params` matches its schema.
    fn check_plugin(&self, report: &mut ValidationReport, path: &str, name: &str, kind: PluginKind, params: &Value) {
        let descriptor = match self.registry.get(name, kind) {
            Ok(d) => d,
            Err(e) => {
                report.push(path, e.kind(), e.to_string());
                return;
            }
        };

        let empty = Value::Object(Default::default());
        let params = if params.is_null() { &empty } else { params };
        if let Err(errors) = validate(&descriptor.schema, params) {
            for error in errors {
                report.push(
                    format!("{}.params", path),
                    ErrorKind::Configuration,
                    format!("{} plugin '{}': {}", kind, name, error),
                );
            }
        }
    }

    fn check_source(&self, report: &mut ValidationReport, path: &str, source: &SourceRef, import: &ImportConfig) {
        match source {
            SourceRef::Named(name) => {
                if !import.sources.contains_key(name) {
                    report.push(
                        path,
                        ErrorKind::Configuration,
                        format!("source '{}' is not declared in the import document", name),
                    );
                }
            }
            SourceRef::Inline(def) => self.check_plugin(report, path, &def.loader, PluginKind::Loader, &def.params),
        }
    }

    fn check_import(&self, import: &ImportConfig, report: &mut ValidationReport) {
        for (name, source) in &import.sources {
            let path = format!("import.sources.{}", name);
            self.check_plugin(report, &path, &source.loader, PluginKind::Loader, &source.params);
        }
    }

    fn check_transform(&self, project: &ProjectConfig, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for group in &project.transform.groups {
            let base = format!("transform.{}", group.group_by);
            if !seen.insert(group.group_by.as_str()) {
                report.push(
                    &base,
                    ErrorKind::Configuration,
                    format!("group '{}' is declared more than once", group.group_by),
                );
            }
            if group.identifier.trim().is_empty() {
                report.push(format!("{}.identifier", base), ErrorKind::Configuration, "identifier is empty");
            }

            self.check_source(report, &format!("{}.source", base), &group.source, &project.import);
            for (i, join) in group.joins.iter().enumerate() {
                let path = format!("{}.joins[{}]", base, i);
                self.check_source(report, &path, &join.source, &project.import);
                if join.key.trim().is_empty() {
                    report.push(path, ErrorKind::Configuration, "join key is empty");
                }
            }
            if let Some(hierarchy) = &group.hierarchy {
                self.check_source(report, &format!("{}.hierarchy", base), &hierarchy.source, &project.import);
            }

            for (name, widget) in &group.widgets {
                let path = format!("{}.widgets.{}", base, name);
                self.check_widget(report, &path, name, widget, group.widgets.keys());
            }
        }
    }

    fn check_widget<'a>(
        &self,
        report: &mut ValidationReport,
        path: &str,
        name: &str,
        widget: &WidgetConfig,
        siblings: impl Iterator<Item = &'a String> + Clone,
    ) {
        match (&widget.plugin, widget.steps.is_empty()) {
            (Some(plugin), true) => {
                self.check_plugin(report, path, plugin, PluginKind::Transformer, &widget.params);
            }
            (None, false) => {
                for (i, step) in widget.steps.iter().enumerate() {
                    let step_path = format!("{}.steps[{}]", path, i);
                    self.check_plugin(report, &step_path, &step.plugin, PluginKind::Transformer, &step.params);
                }
            }
            (Some(_), false) => report.push(
                path,
                ErrorKind::Configuration,
                "declare either 'plugin' or 'steps', not both",
            ),
            (None, true) => report.push(path, ErrorKind::Configuration, "widget has no plugin and no steps"),
        }

        for dependency in &widget.depends_on {
            let path = format!("{}.depends_on", path);
            if dependency == name {
                report.push(path, ErrorKind::Configuration, format!("widget '{}' depends on itself", name));
            } else if !siblings.clone().any(|s| s == dependency) {
                report.push(path, ErrorKind::Configuration, format!("unknown widget '{}'", dependency));
            }
        }
    }

    fn check_export(&self, project: &ProjectConfig, report: &mut ValidationReport) {
        for target in &project.export.exports {
            let base = format!("export.{}", target.name);
            self.check_plugin(report, &base, &target.exporter, PluginKind::Exporter, &target.params);

            for export_group in &target.groups {
                let group_path = format!("{}.groups.{}", base, export_group.group_by);
                let Some(group) = project.transform.group(&export_group.group_by) else {
                    report.push(
                        group_path,
                        ErrorKind::Configuration,
                        format!("group '{}' is not declared in the transform document", export_group.group_by),
                    );
                    continue;
                };

                for (i, widget) in export_group.widgets.iter().enumerate() {
                    let path = format!("{}.widgets[{}]", group_path, i);
                    self.check_plugin(report, &path, &widget.plugin, PluginKind::Widget, &widget.params);
                    if !group.widgets.contains_key(&widget.data_source) {
                        report.push(
                            format!("{}.data_source", path),
                            ErrorKind::Configuration,
                            format!("'{}' is not a widget of group '{}'", widget.data_source, group.group_by),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportConfig, TransformConfig};
    use crate::plugins::builtin;
    use serde_json::json;

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        registry
    }

    fn project(import: &str, transform: &str, export: &str) -> ProjectConfig {
        ProjectConfig {
            import: serde_yaml::from_str(import).unwrap(),
            transform: TransformConfig::from_yaml(transform).unwrap(),
            export: serde_yaml::from_str::<ExportConfig>(export).unwrap(),
        }
    }

    const IMPORT: &str = "sources:\n  occurrences: { loader: table, params: { table: occurrences } }\n";

    #[test]
    fn test_validate_schema() {
        let schema = json!({ "type": "object", "required": ["field"] });
        assert!(validate(&schema, &json!({ "field": "x" })).is_ok());
        let errors = validate(&schema, &json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(is_valid(&schema, &json!({ "field": 1 })));
    }

    #[test]
    fn test_valid_project() {
        let transform = r#"
- group_by: taxon
  identifier: taxon_ref_id
  source: occurrences
  widgets:
    info: { plugin: entity_info }
    top: { plugin: top_ranking, params: { field: taxon_ref_id }, depends_on: [info] }
"#;
        let export = r#"
exports:
  - name: site
    exporter: json_files
    params: { output_dir: out }
    groups:
      - group_by: taxon
        widgets:
          - { plugin: bar_plot, data_source: top }
"#;
        let report = ConfigValidator::new(&registry()).validate(&project(IMPORT, transform, export));
        assert!(report.is_ok(), "{}", report);
    }

    #[test]
    fn test_collects_every_issue() {
        let transform = r#"
- group_by: taxon
  identifier: taxon_ref_id
  source: missing_source
  widgets:
    top: { plugin: top_rank, params: { field: x } }
    stats: { plugin: field_stats, params: { count: 3 } }
    both: { plugin: field_stats, steps: [ { plugin: field_stats } ] }
    empty: { depends_on: [] }
    loop: { plugin: entity_info, depends_on: [loop, ghost] }
- group_by: taxon
  identifier: id
  source: occurrences
"#;
        let export = r#"
exports:
  - name: site
    exporter: pdf
    groups:
      - group_by: plot
      - group_by: taxon
        widgets:
          - { plugin: bar_plot, data_source: nowhere }
"#;
        let report = ConfigValidator::new(&registry()).validate(&project(IMPORT, transform, export));

        let paths: Vec<&str> = report.issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"transform.taxon.source"));
        assert!(paths.contains(&"transform.taxon.widgets.top"));
        assert!(paths.contains(&"transform.taxon.widgets.stats.params"));
        assert!(paths.contains(&"transform.taxon.widgets.both"));
        assert!(paths.contains(&"transform.taxon.widgets.empty"));
        assert!(paths.contains(&"transform.taxon.widgets.loop.depends_on"));
        assert!(paths.contains(&"export.site"));
        assert!(paths.contains(&"export.site.groups.plot"));
        assert!(paths.contains(&"export.site.groups.taxon.widgets[0].data_source"));

        assert_eq!(report.at("transform.taxon.widgets.loop").len(), 2);
        assert_eq!(report.at("transform.taxon.widgets.top")[0].kind, ErrorKind::PluginNotFound);
        assert_eq!(report.at("export.site")[0].kind, ErrorKind::PluginNotFound);
        // Duplicate group name.
        assert!(report
            .issues
            .iter()
            .any(|i| i.path == "transform.taxon" && i.message.contains("more than once")));
    }

    #[test]
    fn test_inline_source_and_step_paths() {
        let transform = r#"
- group_by: plot
  identifier: plot_id
  source: { loader: inline, params: { rows: [] } }
  hierarchy: { source: { loader: csv } }
  widgets:
    chain:
      steps:
        - { plugin: field_stats, params: { field: dbh } }
        - { plugin: nope }
"#;
        let report = ConfigValidator::new(&registry()).validate(&project("{}", transform, "{}"));
        assert_eq!(report.at("transform.plot.source.params").len(), 1);
        assert_eq!(report.at("transform.plot.hierarchy")[0].kind, ErrorKind::PluginNotFound);
        assert_eq!(report.at("transform.plot.widgets.chain.steps[1]").len(), 1);
        assert!(report.at("transform.plot.widgets.chain.steps[0]").is_empty());
        assert!(report.to_string().contains("[PluginNotFoundError] transform.plot.widgets.chain.steps[1]"));
    }
}
