//! Process-wide plugin registry.
//!
//! Populated once by [`load`], read by everyone through [`snapshot`]. Only
//! [`reload`] and [`reset`] mutate it afterwards; both swap in a new
//! registry so snapshots already handed out stay unchanged.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

use super::{LoadReport, PluginLoader, PluginRegistry};

struct GlobalRegistry {
    registry: Arc<PluginRegistry>,
    loader: Option<PluginLoader>,
}

static GLOBAL: Lazy<RwLock<GlobalRegistry>> = Lazy::new(|| {
    RwLock::new(GlobalRegistry {
        registry: Arc::new(PluginRegistry::new()),
        loader: None,
    })
});

/// Replace the global registry with a fresh load by `loader`.
pub fn load(loader: PluginLoader) -> LoadReport {
    let mut registry = PluginRegistry::new();
    let report = loader.load(&mut registry);

    let mut global = GLOBAL.write();
    global.registry = Arc::new(registry);
    global.loader = Some(loader);
    report
}

/// Re-scan `path` with the loader used by the last [`load`].
///
/// Without a prior load, only bundled plugins are known and the path is
/// scanned as if it were a project directory.
pub fn reload(path: &Path) -> LoadReport {
    let mut global = GLOBAL.write();
    let mut registry = (*global.registry).clone();
    let report = match &global.loader {
        Some(loader) => loader.reload(&mut registry, path),
        None => PluginLoader::new(vec![]).reload(&mut registry, path),
    };
    global.registry = Arc::new(registry);
    report
}

/// Drop every plugin and forget the loader.
pub fn reset() {
    let mut global = GLOBAL.write();
    global.registry = Arc::new(PluginRegistry::new());
    global.loader = None;
}

/// The current registry.
pub fn snapshot() -> Arc<PluginRegistry> {
    Arc::clone(&GLOBAL.read().registry)
}
