//! Plugin substrate.
//!
//! ```text
//! ┌──────────────┐   register    ┌──────────────┐   get(name, kind)   ┌────────────┐
//! │ PluginLoader │──────────────▶│PluginRegistry│◀────────────────────│  Validator │
//! │ bundled +    │               │ (name, kind) │                     │  Engine    │
//! │ project dirs │               │ → descriptor │                     │  Exporter  │
//! └──────────────┘               └──────────────┘                     └────────────┘
//! ```
//!
//! Four plugin kinds, each an interface trait ([`Loader`], [`Transformer`],
//! [`Exporter`], [`Widget`]). A [`PluginDescriptor`] carries the name, kind,
//! parameter schema, provenance and the implementation handle.
//!
//! - [`registry`] - the `(name, kind)` catalog
//! - [`loader`] - two-phase discovery with per-module isolation
//! - [`manifest`] - project plugin module format
//! - [`preset`] - plugins derived from another plugin plus default params
//! - [`global`] - process-wide registry lifecycle
//! - [`builtin`] - plugins shipped with the core

pub mod builtin;
pub mod global;
pub mod loader;
pub mod manifest;
pub mod preset;
pub mod registry;
pub mod traits;

pub use loader::{LoadReport, ModuleFailure, PluginLoader};
pub use registry::{PluginRegistry, Registrar};
pub use traits::{ExportOutcome, Exporter, Loader, Transformer, Widget, WidgetInput};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// The four extensibility kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Loader,
    Transformer,
    Exporter,
    Widget,
}

impl PluginKind {
    pub const ALL: [PluginKind; 4] = [
        PluginKind::Loader,
        PluginKind::Transformer,
        PluginKind::Exporter,
        PluginKind::Widget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Loader => "loader",
            PluginKind::Transformer => "transformer",
            PluginKind::Exporter => "exporter",
            PluginKind::Widget => "widget",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PluginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown plugin kind '{}'", s))
    }
}

/// Where a descriptor was registered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "path")]
pub enum PluginSource {
    /// Shipped with the core
    Bundled,
    /// A project plugin module file
    Path(PathBuf),
}

impl PluginSource {
    /// Whether this source lies under `path` (file or directory).
    pub fn is_under(&self, path: &std::path::Path) -> bool {
        match self {
            PluginSource::Bundled => false,
            PluginSource::Path(p) => p.starts_with(path),
        }
    }
}

/// Implementation handle, one variant per kind interface.
#[derive(Clone)]
pub enum PluginHandle {
    Loader(Arc<dyn Loader>),
    Transformer(Arc<dyn Transformer>),
    Exporter(Arc<dyn Exporter>),
    Widget(Arc<dyn Widget>),
}

impl PluginHandle {
    pub fn kind(&self) -> PluginKind {
        match self {
            PluginHandle::Loader(_) => PluginKind::Loader,
            PluginHandle::Transformer(_) => PluginKind::Transformer,
            PluginHandle::Exporter(_) => PluginKind::Exporter,
            PluginHandle::Widget(_) => PluginKind::Widget,
        }
    }

    fn param_schema(&self) -> Value {
        match self {
            PluginHandle::Loader(p) => p.param_schema(),
            PluginHandle::Transformer(p) => p.param_schema(),
            PluginHandle::Exporter(p) => p.param_schema(),
            PluginHandle::Widget(p) => p.param_schema(),
        }
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginHandle::{}", self.kind())
    }
}

/// Catalog entry for one plugin.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema (draft 7) for the plugin's parameters
    pub schema: Value,
    pub source: PluginSource,
    pub handle: PluginHandle,
}

impl PluginDescriptor {
    /// Descriptor whose schema comes from the implementation.
    pub fn new(name: &str, description: &str, handle: PluginHandle) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema: handle.param_schema(),
            source: PluginSource::Bundled,
            handle,
        }
    }

    pub fn loader(name: &str, description: &str, plugin: impl Loader + 'static) -> Self {
        Self::new(name, description, PluginHandle::Loader(Arc::new(plugin)))
    }

    pub fn transformer(name: &str, description: &str, plugin: impl Transformer + 'static) -> Self {
        Self::new(name, description, PluginHandle::Transformer(Arc::new(plugin)))
    }

    pub fn exporter(name: &str, description: &str, plugin: impl Exporter + 'static) -> Self {
        Self::new(name, description, PluginHandle::Exporter(Arc::new(plugin)))
    }

    pub fn widget(name: &str, description: &str, plugin: impl Widget + 'static) -> Self {
        Self::new(name, description, PluginHandle::Widget(Arc::new(plugin)))
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn kind(&self) -> PluginKind {
        self.handle.kind()
    }
}

/// Serializable view of a descriptor for listings.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub kind: PluginKind,
    pub description: String,
    pub source: PluginSource,
}

impl From<&PluginDescriptor> for PluginInfo {
    fn from(d: &PluginDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            kind: d.kind(),
            description: d.description.clone(),
            source: d.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_kind_parse_and_display() {
        assert_eq!("Transformer".parse::<PluginKind>().unwrap(), PluginKind::Transformer);
        assert_eq!(PluginKind::Widget.to_string(), "widget");
        assert!("renderer".parse::<PluginKind>().is_err());
    }

    #[test]
    fn test_source_is_under() {
        let source = PluginSource::Path("/project/plugins/stats.yml".into());
        assert!(source.is_under(Path::new("/project/plugins")));
        assert!(source.is_under(Path::new("/project/plugins/stats.yml")));
        assert!(!source.is_under(Path::new("/project/other")));
        assert!(!PluginSource::Bundled.is_under(Path::new("/")));
    }

    #[test]
    fn test_plugin_info_listing() {
        let mut registry = PluginRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        let listing: Vec<PluginInfo> = registry.all().map(|d| PluginInfo::from(&**d)).collect();
        assert_eq!(listing.len(), registry.len());

        let first = serde_json::to_value(&listing[0]).unwrap();
        assert_eq!(first["name"], "table");
        assert_eq!(first["kind"], "loader");
        assert_eq!(first["source"]["type"], "bundled");
    }
}
