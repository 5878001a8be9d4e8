//! Project plugin modules.
//!
//! A module is one YAML or JSON file. Its registration entry point declares
//! presets over plugins that are already registered (bundled ones, or ones
//! declared earlier in traversal order):
//!
//! ```yaml
//! plugins:
//!   - name: top_families
//!     kind: transformer
//!     extends: top_ranking
//!     description: Ten most frequent families
//!     defaults:
//!       mode: hierarchical
//!       target_rank: family
//!       count: 10
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::preset::{preset_handle, preset_schema};
use super::{PluginDescriptor, PluginKind, Registrar};
use crate::error::LoadError;

fn empty_defaults() -> Value {
    Value::Object(Default::default())
}

/// One declared plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub kind: PluginKind,
    /// Name of the plugin (same kind) this one derives from
    pub extends: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_defaults")]
    pub defaults: Value,
    /// Replaces the derived parameter schema
    #[serde(default)]
    pub schema: Option<Value>,
}

/// A parsed plugin module.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default)]
    pub plugins: Vec<ManifestEntry>,
}

impl PluginManifest {
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest: PluginManifest =
            serde_yaml::from_str(&content).map_err(|e| LoadError::Manifest {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        manifest.path = path.to_path_buf();
        Ok(manifest)
    }

    /// Module registration entry point.
    pub fn register(&self, registrar: &mut Registrar<'_>) -> Result<(), LoadError> {
        for entry in &self.plugins {
            if !entry.defaults.is_object() {
                return Err(LoadError::Manifest {
                    path: self.path.clone(),
                    message: format!("defaults of '{}' must be a mapping", entry.name),
                });
            }

            let base = registrar
                .lookup(&entry.extends, entry.kind)
                .ok_or_else(|| LoadError::UnknownBase {
                    name: entry.name.clone(),
                    kind: entry.kind,
                    extends: entry.extends.clone(),
                })?;
            let base_schema = registrar
                .schema_of(&entry.extends, entry.kind)
                .unwrap_or_else(|| serde_json::json!({ "type": "object" }));

            let schema = entry
                .schema
                .clone()
                .unwrap_or_else(|| preset_schema(&base_schema, &entry.defaults));

            let description = if entry.description.is_empty() {
                format!("preset of {}", entry.extends)
            } else {
                entry.description.clone()
            };

            let descriptor = PluginDescriptor::new(
                &entry.name,
                &description,
                preset_handle(base, entry.defaults.clone()),
            )
            .with_schema(schema);

            registrar
                .register(descriptor)
                .map_err(|source| LoadError::Registration {
                    module: self.path.display().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{builtin, PluginRegistry, PluginSource};
    use serde_json::json;
    use tempfile::tempdir;

    fn bundled_registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        registry
    }

    #[test]
    fn test_manifest_registers_preset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ranking.yml");
        fs::write(
            &path,
            "plugins:\n  - name: top_families\n    kind: transformer\n    extends: top_ranking\n    defaults: { mode: hierarchical, count: 10 }\n",
        )
        .unwrap();

        let registry = bundled_registry();
        let manifest = PluginManifest::from_path(&path).unwrap();
        let mut registrar = Registrar::new(&registry, PluginSource::Path(path.clone()));
        manifest.register(&mut registrar).unwrap();

        let pending = registrar.into_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind(), PluginKind::Transformer);
        assert_eq!(pending[0].source, PluginSource::Path(path));
        let required = pending[0].schema["required"].as_array().cloned().unwrap_or_default();
        assert!(!required.contains(&json!("count")));
    }

    #[test]
    fn test_unknown_base_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        fs::write(
            &path,
            "plugins:\n  - { name: x, kind: widget, extends: does_not_exist }\n",
        )
        .unwrap();

        let registry = bundled_registry();
        let manifest = PluginManifest::from_path(&path).unwrap();
        let mut registrar = Registrar::new(&registry, PluginSource::Path(path));
        let err = manifest.register(&mut registrar).unwrap_err();
        assert!(matches!(err, LoadError::UnknownBase { .. }));
    }

    #[test]
    fn test_malformed_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yml");
        fs::write(&path, "plugins: [ { name: x, kind: gadget, extends: y } ]").unwrap();
        let err = PluginManifest::from_path(&path).unwrap_err();
        assert!(matches!(err, LoadError::Manifest { .. }));
    }
}
