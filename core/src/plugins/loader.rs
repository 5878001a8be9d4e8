//! Plugin discovery.
//!
//! Two phases, always in the same order so reloads are reproducible:
//!
//! 1. bundled modules ([`super::builtin::BUNDLED`]), in declaration order
//! 2. project directories, in the order given, each walked recursively
//!    with files visited in lexicographic path order
//!
//! Every module registers inside a guarded step. A module that fails to
//! parse, fails to register or panics is skipped with a warning; its
//! partial registrations are discarded and other modules still load.

use serde::Serialize;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use super::builtin;
use super::manifest::PluginManifest;
use super::{PluginRegistry, PluginSource, Registrar};
use crate::error::{LoadError, RegistryResult};

const MODULE_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// A plugin module compiled into the core.
pub struct BundledModule {
    pub name: &'static str,
    pub register: fn(&mut Registrar<'_>) -> RegistryResult<()>,
}

/// A module that was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleFailure {
    pub module: String,
    pub error: String,
}

/// Outcome of a load or reload pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Modules that registered successfully
    pub modules: Vec<String>,
    /// Number of descriptors added
    pub registered: usize,
    /// Descriptors removed by a reload
    pub unregistered: usize,
    pub failures: Vec<ModuleFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Discovers and registers plugin modules.
pub struct PluginLoader {
    bundled: &'static [BundledModule],
    project_dirs: Vec<PathBuf>,
}

impl PluginLoader {
    /// Loader for the bundled plugin set plus the given project directories.
    pub fn new(project_dirs: Vec<PathBuf>) -> Self {
        Self::with_bundled(builtin::BUNDLED, project_dirs)
    }

    pub fn with_bundled(bundled: &'static [BundledModule], project_dirs: Vec<PathBuf>) -> Self {
        Self {
            bundled,
            project_dirs,
        }
    }

    /// Run both discovery phases into `registry`.
    pub fn load(&self, registry: &mut PluginRegistry) -> LoadReport {
        let mut report = LoadReport::default();

        for module in self.bundled {
            let outcome = guarded(registry, PluginSource::Bundled, module.name, |registrar| {
                (module.register)(registrar).map_err(|source| LoadError::Registration {
                    module: module.name.to_string(),
                    source,
                })
            });
            record(&mut report, module.name.to_string(), outcome);
        }

        for dir in &self.project_dirs {
            self.scan(registry, dir, &mut report);
        }

        tracing::info!(
            registered = report.registered,
            failures = report.failures.len(),
            "plugin loading finished"
        );
        report
    }

    /// Drop everything registered from `path`, then scan only `path`.
    ///
    /// `path` may be a single module file or a directory; it must be
    /// spelled the way the loader saw it during [`PluginLoader::load`].
    pub fn reload(&self, registry: &mut PluginRegistry, path: &Path) -> LoadReport {
        let mut report = LoadReport::default();
        let removed = registry.unregister_source(path);
        report.unregistered = removed.len();
        tracing::info!(path = %path.display(), removed = removed.len(), "reloading plugins");

        if path.exists() {
            self.scan(registry, path, &mut report);
        }
        report
    }

    fn scan(&self, registry: &mut PluginRegistry, path: &Path, report: &mut LoadReport) {
        let files = match module_paths(path) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read plugin directory");
                report.failures.push(ModuleFailure {
                    module: path.display().to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };

        for file in files {
            let name = file.display().to_string();
            let outcome = guarded(registry, PluginSource::Path(file.clone()), &name, |registrar| {
                PluginManifest::from_path(&file)?.register(registrar)
            });
            record(report, name, outcome);
        }
    }
}

/// Run one module's registration, then commit its descriptors atomically.
fn guarded<F>(
    registry: &mut PluginRegistry,
    source: PluginSource,
    module: &str,
    register: F,
) -> Result<usize, LoadError>
where
    F: FnOnce(&mut Registrar<'_>) -> Result<(), LoadError>,
{
    let pending = {
        let mut registrar = Registrar::new(registry, source);
        match catch_unwind(AssertUnwindSafe(|| register(&mut registrar))) {
            Ok(Ok(())) => registrar.into_pending(),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(LoadError::Panic(module.to_string())),
        }
    };

    registry
        .register_all(pending)
        .map_err(|source| LoadError::Registration {
            module: module.to_string(),
            source,
        })
}

fn record(report: &mut LoadReport, module: String, outcome: Result<usize, LoadError>) {
    match outcome {
        Ok(count) => {
            tracing::debug!(module = %module, count, "plugin module registered");
            report.registered += count;
            report.modules.push(module);
        }
        Err(e) => {
            tracing::warn!(module = %module, error = %e, "skipping plugin module");
            report.failures.push(ModuleFailure {
                module,
                error: e.to_string(),
            });
        }
    }
}

/// Module files under `path` in lexicographic order.
///
/// A file path yields itself if it has a module extension.
pub fn module_paths(path: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    if path.is_file() {
        if is_module(path) {
            files.push(path.to_path_buf());
        }
        return Ok(files);
    }

    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| LoadError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                pending.push(p);
            } else if is_module(&p) {
                files.push(p);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_module(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MODULE_EXTENSIONS.contains(&e))
}
