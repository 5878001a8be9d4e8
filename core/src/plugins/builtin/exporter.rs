//! `json_files`: one JSON document per entity.
//!
//! ```text
//! <output_dir>/
//! ├── taxon/
//! │   ├── 1.json      { "general_info": {...}, "top_families": [...] }
//! │   └── 2.json
//! └── plot/
//!     └── P1.json
//! ```
//!
//! When the export group lists widgets, only their `data_source` results are
//! written and each is checked against the widget's data schema. Otherwise
//! every widget result of the group is written. Error-marked results are
//! written as `{"error": {...}}`.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ExportGroup, ExportTarget};
use crate::error::WidgetError;
use crate::models::WidgetResult;
use crate::plugins::{ExportOutcome, Exporter, PluginRegistry};
use crate::validation::validate;

fn default_pretty() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct JsonFilesParams {
    output_dir: PathBuf,
    #[serde(default = "default_pretty")]
    pretty: bool,
}

/// File name for an entity id: anything outside `[A-Za-z0-9_.-]` becomes `_`.
pub fn file_stem(entity_id: &str) -> String {
    let stem: String = entity_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        format!("_{}", stem)
    } else {
        stem
    }
}

pub struct JsonFiles;

impl JsonFiles {
    fn document(
        &self,
        group_by: &str,
        entity_id: &str,
        widgets: &IndexMap<&str, &WidgetResult>,
        layout: Option<&ExportGroup>,
        registry: &PluginRegistry,
        warnings: &mut Vec<String>,
    ) -> Result<Map<String, Value>, WidgetError> {
        let mut doc = Map::new();
        let Some(layout) = layout.filter(|g| !g.widgets.is_empty()) else {
            for (name, result) in widgets {
                doc.insert(name.to_string(), result.artifact());
            }
            return Ok(doc);
        };

        for export_widget in &layout.widgets {
            let Some(result) = widgets.get(export_widget.data_source.as_str()) else {
                warnings.push(format!(
                    "{}/{}: no result for '{}'",
                    group_by, entity_id, export_widget.data_source
                ));
                doc.insert(export_widget.data_source.clone(), Value::Null);
                continue;
            };

            if !result.is_error() {
                let renderer = registry.widget(&export_widget.plugin)?;
                if let Err(errors) = validate(&renderer.data_schema(), &result.value) {
                    warnings.push(format!(
                        "{}/{}: '{}' cannot render '{}': {}",
                        group_by,
                        entity_id,
                        export_widget.plugin,
                        export_widget.data_source,
                        errors.join("; ")
                    ));
                }
            }
            doc.insert(export_widget.data_source.clone(), result.artifact());
        }
        Ok(doc)
    }
}

fn write_json(path: &Path, value: &Value, pretty: bool) -> Result<(), WidgetError> {
    let content = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| WidgetError::Execution(e.to_string()))?;
    fs::write(path, content).map_err(|e| WidgetError::Execution(format!("cannot write {}: {}", path.display(), e)))
}

impl Exporter for JsonFiles {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["output_dir"],
            "properties": {
                "output_dir": { "type": "string" },
                "pretty": { "type": "boolean" }
            }
        })
    }

    fn export(
        &self,
        target: &ExportTarget,
        results: &IndexMap<String, Vec<WidgetResult>>,
        registry: &PluginRegistry,
    ) -> Result<ExportOutcome, WidgetError> {
        let params: JsonFilesParams = serde_json::from_value(target.params.clone()).map_err(WidgetError::params)?;
        let mut outcome = ExportOutcome::default();

        for (group_by, group_results) in results {
            let layout = target.groups.iter().find(|g| &g.group_by == group_by);
            if !target.groups.is_empty() && layout.is_none() {
                continue;
            }

            let mut entities: IndexMap<&str, IndexMap<&str, &WidgetResult>> = IndexMap::new();
            for result in group_results {
                entities
                    .entry(result.entity_id.as_str())
                    .or_default()
                    .insert(result.widget.as_str(), result);
            }

            let dir = params.output_dir.join(file_stem(group_by));
            fs::create_dir_all(&dir)
                .map_err(|e| WidgetError::Execution(format!("cannot create {}: {}", dir.display(), e)))?;

            for (entity_id, widgets) in &entities {
                let doc = self.document(group_by, entity_id, widgets, layout, registry, &mut outcome.warnings)?;
                let path = dir.join(format!("{}.json", file_stem(entity_id)));
                write_json(&path, &Value::Object(doc), params.pretty)?;
                outcome.files.push(path);
            }
        }

        for warning in &outcome.warnings {
            tracing::warn!(export = %target.name, "{}", warning);
        }
        Ok(outcome)
    }
}
