//! Plugins shipped with the core.
//!
//! | module         | kind        | plugins                                              |
//! |----------------|-------------|------------------------------------------------------|
//! | `loaders`      | loader      | `table`, `inline`                                    |
//! | `transformers` | transformer | `database_aggregator`, `top_ranking`, `field_stats`, `entity_info` |
//! | `exporters`    | exporter    | `json_files`                                         |
//! | `widgets`      | widget      | `info_grid`, `bar_plot`, `raw_data`                  |

pub mod aggregator;
pub mod exporter;
pub mod loaders;
pub mod ranking;
pub mod sql;
pub mod stats;
pub mod widgets;

use super::loader::BundledModule;
use super::{PluginDescriptor, PluginRegistry, PluginSource, Registrar};
use crate::error::RegistryResult;

/// Bundled modules in registration order.
pub static BUNDLED: &[BundledModule] = &[
    BundledModule {
        name: "loaders",
        register: register_loaders,
    },
    BundledModule {
        name: "transformers",
        register: register_transformers,
    },
    BundledModule {
        name: "exporters",
        register: register_exporters,
    },
    BundledModule {
        name: "widgets",
        register: register_widgets,
    },
];

fn register_loaders(r: &mut Registrar<'_>) -> RegistryResult<()> {
    r.register(PluginDescriptor::loader("table", "Rows of a store table", loaders::TableLoader))?;
    r.register(PluginDescriptor::loader(
        "inline",
        "Records written in configuration",
        loaders::InlineLoader,
    ))
}

fn register_transformers(r: &mut Registrar<'_>) -> RegistryResult<()> {
    r.register(PluginDescriptor::transformer(
        "database_aggregator",
        "Validated SQL queries plus computed fields",
        aggregator::DatabaseAggregator,
    ))?;
    r.register(PluginDescriptor::transformer(
        "top_ranking",
        "Most frequent values, optionally rolled up a hierarchy",
        ranking::TopRanking,
    ))?;
    r.register(PluginDescriptor::transformer(
        "field_stats",
        "Count, min, max, sum and mean of a numeric field",
        stats::FieldStats,
    ))?;
    r.register(PluginDescriptor::transformer(
        "entity_info",
        "Identity and position of the entity",
        stats::EntityInfo,
    ))
}

fn register_exporters(r: &mut Registrar<'_>) -> RegistryResult<()> {
    r.register(PluginDescriptor::exporter(
        "json_files",
        "One JSON document per entity",
        exporter::JsonFiles,
    ))
}

fn register_widgets(r: &mut Registrar<'_>) -> RegistryResult<()> {
    r.register(PluginDescriptor::widget("info_grid", "Key/value grid", widgets::InfoGrid))?;
    r.register(PluginDescriptor::widget("bar_plot", "Bar chart", widgets::BarPlot))?;
    r.register(PluginDescriptor::widget("raw_data", "Value as-is", widgets::RawData))
}

/// Register every bundled plugin directly, without the loader's isolation.
pub fn register_all(registry: &mut PluginRegistry) -> RegistryResult<usize> {
    let mut pending = Vec::new();
    for module in BUNDLED {
        let mut registrar = Registrar::new(registry, PluginSource::Bundled);
        (module.register)(&mut registrar)?;
        pending.extend(registrar.into_pending());
    }
    registry.register_all(pending)
}

/// Shared fixture for plugin tests: in-memory store, bundled registry and
/// a run context with no import document.
#[cfg(test)]
pub(crate) mod testing {
    use indexmap::IndexMap;
    use serde_json::Value;
    use std::sync::Arc;

    use crate::config::ImportConfig;
    use crate::error::WidgetError;
    use crate::models::Record;
    use crate::plugins::{PluginRegistry, Transformer, WidgetInput};
    use crate::store::{memory_store, Store};
    use crate::transform::RunContext;

    pub struct Harness {
        run: RunContext,
    }

    impl Harness {
        pub async fn new() -> Self {
            Self::with_import(ImportConfig::default()).await
        }

        pub async fn with_import(import: ImportConfig) -> Self {
            let store = Arc::new(memory_store().await);
            let mut registry = PluginRegistry::new();
            super::register_all(&mut registry).unwrap();
            Self {
                run: RunContext::new(store, Arc::new(registry), Arc::new(import)),
            }
        }

        pub fn records(value: Value) -> Vec<Record> {
            serde_json::from_value(value).unwrap()
        }

        pub fn store(&self) -> &Store {
            self.run.store()
        }

        pub fn run(&self) -> &RunContext {
            &self.run
        }

        pub async fn transform(
            &self,
            plugin: &dyn Transformer,
            records: &[Record],
            params: &Value,
        ) -> Result<Value, WidgetError> {
            self.invoke(plugin, records, &IndexMap::new(), params).await
        }

        pub async fn transform_with_dependencies(
            &self,
            plugin: &dyn Transformer,
            dependencies: &IndexMap<String, Value>,
            params: &Value,
        ) -> Result<Value, WidgetError> {
            self.invoke(plugin, &[], dependencies, params).await
        }

        async fn invoke(
            &self,
            plugin: &dyn Transformer,
            records: &[Record],
            dependencies: &IndexMap<String, Value>,
            params: &Value,
        ) -> Result<Value, WidgetError> {
            let input = WidgetInput {
                group_by: "test",
                widget: "w",
                entity_id: "E1",
                entity: None,
                hierarchy: None,
                records,
                previous: None,
                dependencies,
                run: &self.run,
            };
            plugin.transform(&input, params).await
        }
    }
}
