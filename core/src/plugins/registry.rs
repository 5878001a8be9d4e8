//! In-memory plugin registry.
//!
//! Keyed by `(name, kind)`: the same name may exist once per kind. Entries
//! keep registration order, which is what [`PluginRegistry::list`] returns.
//! Order is for diagnostics only; execution order comes from configuration.

use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;

use super::{Exporter, Loader, PluginDescriptor, PluginHandle, PluginKind, PluginSource, Transformer, Widget};
use crate::error::{RegistryError, RegistryResult};

type Key = (PluginKind, String);

/// Catalog of registered plugins.
///
/// Not internally synchronized; share it behind an `Arc` once loading is
/// done (see [`super::global`]).
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: IndexMap<Key, Arc<PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails if `(name, kind)` already exists.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> RegistryResult<()> {
        let key = (descriptor.kind(), descriptor.name.clone());
        if self.plugins.contains_key(&key) {
            return Err(RegistryError::DuplicatePlugin {
                name: key.1,
                kind: key.0,
            });
        }
        self.plugins.insert(key, Arc::new(descriptor));
        Ok(())
    }

    /// Register a batch atomically: either every descriptor is added or none.
    pub fn register_all(&mut self, descriptors: Vec<PluginDescriptor>) -> RegistryResult<usize> {
        let mut seen = std::collections::HashSet::new();
        for d in &descriptors {
            let key = (d.kind(), d.name.clone());
            if self.plugins.contains_key(&key) || !seen.insert(key) {
                return Err(RegistryError::DuplicatePlugin {
                    name: d.name.clone(),
                    kind: d.kind(),
                });
            }
        }
        let count = descriptors.len();
        for d in descriptors {
            self.plugins.insert((d.kind(), d.name.clone()), Arc::new(d));
        }
        Ok(count)
    }

    /// Look up a descriptor.
    pub fn get(&self, name: &str, kind: PluginKind) -> RegistryResult<Arc<PluginDescriptor>> {
        self.plugins
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::PluginNotFound {
                name: name.to_string(),
                kind,
            })
    }

    pub fn contains(&self, name: &str, kind: PluginKind) -> bool {
        self.plugins.contains_key(&(kind, name.to_string()))
    }

    /// Descriptors of one kind in registration order.
    pub fn list(&self, kind: PluginKind) -> Vec<Arc<PluginDescriptor>> {
        self.plugins
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, d)| Arc::clone(d))
            .collect()
    }

    /// Every descriptor in registration order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<PluginDescriptor>> {
        self.plugins.values()
    }

    /// Remove every descriptor registered from a file under `path`.
    ///
    /// Returns the removed `(name, kind)` pairs. Remaining entries keep
    /// their relative order.
    pub fn unregister_source(&mut self, path: &Path) -> Vec<(String, PluginKind)> {
        let mut removed = Vec::new();
        self.plugins.retain(|(kind, name), d| {
            if d.source.is_under(path) {
                removed.push((name.clone(), *kind));
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    // -------------------------------------------------------------------------
    // Typed accessors
    // -------------------------------------------------------------------------

    pub fn transformer(&self, name: &str) -> RegistryResult<Arc<dyn Transformer>> {
        match &self.get(name, PluginKind::Transformer)?.handle {
            PluginHandle::Transformer(t) => Ok(Arc::clone(t)),
            _ => Err(not_found(name, PluginKind::Transformer)),
        }
    }

    pub fn loader(&self, name: &str) -> RegistryResult<Arc<dyn Loader>> {
        match &self.get(name, PluginKind::Loader)?.handle {
            PluginHandle::Loader(l) => Ok(Arc::clone(l)),
            _ => Err(not_found(name, PluginKind::Loader)),
        }
    }

    pub fn exporter(&self, name: &str) -> RegistryResult<Arc<dyn Exporter>> {
        match &self.get(name, PluginKind::Exporter)?.handle {
            PluginHandle::Exporter(e) => Ok(Arc::clone(e)),
            _ => Err(not_found(name, PluginKind::Exporter)),
        }
    }

    pub fn widget(&self, name: &str) -> RegistryResult<Arc<dyn Widget>> {
        match &self.get(name, PluginKind::Widget)?.handle {
            PluginHandle::Widget(w) => Ok(Arc::clone(w)),
            _ => Err(not_found(name, PluginKind::Widget)),
        }
    }
}

fn not_found(name: &str, kind: PluginKind) -> RegistryError {
    RegistryError::PluginNotFound {
        name: name.to_string(),
        kind,
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("count", &self.plugins.len())
            .field("keys", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Registrar
// =============================================================================

/// Registration entry point handed to one plugin module.
///
/// Collects the module's descriptors without touching the registry; the
/// loader commits them together once the module finished without error.
pub struct Registrar<'r> {
    registry: &'r PluginRegistry,
    source: PluginSource,
    pending: Vec<PluginDescriptor>,
}

impl<'r> Registrar<'r> {
    pub fn new(registry: &'r PluginRegistry, source: PluginSource) -> Self {
        Self {
            registry,
            source,
            pending: Vec::new(),
        }
    }

    /// Queue a descriptor, stamping it with this module's source.
    pub fn register(&mut self, mut descriptor: PluginDescriptor) -> RegistryResult<()> {
        let (name, kind) = (descriptor.name.clone(), descriptor.kind());
        let queued = self.pending.iter().any(|d| d.name == name && d.kind() == kind);
        if queued || self.registry.contains(&name, kind) {
            return Err(RegistryError::DuplicatePlugin { name, kind });
        }
        descriptor.source = self.source.clone();
        self.pending.push(descriptor);
        Ok(())
    }

    /// Resolve a plugin queued by this module or already registered.
    pub fn lookup(&self, name: &str, kind: PluginKind) -> Option<PluginHandle> {
        self.pending
            .iter()
            .find(|d| d.name == name && d.kind() == kind)
            .map(|d| d.handle.clone())
            .or_else(|| self.registry.get(name, kind).ok().map(|d| d.handle.clone()))
    }

    /// Schema of a queued or registered plugin.
    pub fn schema_of(&self, name: &str, kind: PluginKind) -> Option<serde_json::Value> {
        self.pending
            .iter()
            .find(|d| d.name == name && d.kind() == kind)
            .map(|d| d.schema.clone())
            .or_else(|| self.registry.get(name, kind).ok().map(|d| d.schema.clone()))
    }

    pub fn into_pending(self) -> Vec<PluginDescriptor> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin::widgets::RawData;
    use std::path::PathBuf;

    fn widget(name: &str) -> PluginDescriptor {
        PluginDescriptor::widget(name, "test widget", RawData)
    }

    fn from_path(name: &str, path: &str) -> PluginDescriptor {
        let mut d = widget(name);
        d.source = PluginSource::Path(PathBuf::from(path));
        d
    }

    #[test]
    fn test_register_and_get() {
        let mut reg = PluginRegistry::new();
        reg.register(widget("bar_plot")).unwrap();

        let d = reg.get("bar_plot", PluginKind::Widget).unwrap();
        assert_eq!(d.name, "bar_plot");
        assert!(reg.widget("bar_plot").is_ok());
    }

    #[test]
    fn test_duplicate_register_fails() {
        let mut reg = PluginRegistry::new();
        reg.register(widget("x")).unwrap();
        let err = reg.register(widget("x")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicatePlugin {
                name: "x".into(),
                kind: PluginKind::Widget
            }
        );
    }

    #[test]
    fn test_same_name_different_kind_is_allowed() {
        let mut reg = PluginRegistry::new();
        reg.register(widget("stats")).unwrap();
        assert!(reg.get("stats", PluginKind::Transformer).is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let reg = PluginRegistry::new();
        let err = reg.get("ghost", PluginKind::Loader).unwrap_err();
        assert!(matches!(err, RegistryError::PluginNotFound { .. }));
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let mut reg = PluginRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            reg.register(widget(name)).unwrap();
        }
        let names: Vec<_> = reg.list(PluginKind::Widget).iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert!(reg.list(PluginKind::Exporter).is_empty());
    }

    #[test]
    fn test_register_all_is_atomic() {
        let mut reg = PluginRegistry::new();
        reg.register(widget("taken")).unwrap();
        let err = reg.register_all(vec![widget("fresh"), widget("taken")]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePlugin { .. }));
        assert!(!reg.contains("fresh", PluginKind::Widget));
    }

    #[test]
    fn test_unregister_source() {
        let mut reg = PluginRegistry::new();
        reg.register(widget("bundled")).unwrap();
        reg.register(from_path("a", "/p/plugins/a.yml")).unwrap();
        reg.register(from_path("b", "/p/other/b.yml")).unwrap();

        let removed = reg.unregister_source(Path::new("/p/plugins"));
        assert_eq!(removed, vec![("a".to_string(), PluginKind::Widget)]);
        assert!(reg.get("a", PluginKind::Widget).is_err());
        assert!(reg.get("b", PluginKind::Widget).is_ok());
        assert!(reg.get("bundled", PluginKind::Widget).is_ok());
    }

    #[test]
    fn test_registrar_rejects_duplicates_within_module() {
        let reg = PluginRegistry::new();
        let mut registrar = Registrar::new(&reg, PluginSource::Path("/m.yml".into()));
        registrar.register(widget("w")).unwrap();
        assert!(registrar.register(widget("w")).is_err());
        assert!(registrar.lookup("w", PluginKind::Widget).is_some());

        let pending = registrar.into_pending();
        assert_eq!(pending[0].source, PluginSource::Path("/m.yml".into()));
    }
}
