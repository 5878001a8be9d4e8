//! Presets: a registered plugin plus default parameters.
//!
//! Project plugin modules declare presets instead of code. A preset keeps
//! the kind of the plugin it extends and merges its defaults underneath the
//! parameters given in configuration.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use super::traits::{ExportOutcome, Exporter, Loader, Transformer, Widget, WidgetInput};
use super::{PluginHandle, PluginRegistry};
use crate::config::ExportTarget;
use crate::error::WidgetError;
use crate::models::{Record, WidgetResult};
use crate::store::Store;

/// Deep-merge `params` over `defaults`. Objects merge key by key, anything
/// else in `params` replaces the default.
pub fn merge_params(defaults: &Value, params: &Value) -> Value {
    match (defaults, params) {
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                let next = match merged.get(key) {
                    Some(existing) => merge_params(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => defaults.clone(),
        (_, other) => other.clone(),
    }
}

/// Base schema with the defaulted keys no longer required.
pub fn preset_schema(base: &Value, defaults: &Value) -> Value {
    let mut schema = base.clone();
    let (Some(obj), Some(defaults)) = (schema.as_object_mut(), defaults.as_object()) else {
        return schema;
    };
    if let Some(Value::Array(required)) = obj.get_mut("required") {
        required.retain(|r| r.as_str().map_or(true, |name| !defaults.contains_key(name)));
    }
    schema
}

/// A plugin of kind `P` with default parameters.
pub struct Preset<P: ?Sized> {
    base: Arc<P>,
    defaults: Value,
}

impl<P: ?Sized> Preset<P> {
    pub fn new(base: Arc<P>, defaults: Value) -> Self {
        Self { base, defaults }
    }

    fn params(&self, params: &Value) -> Value {
        merge_params(&self.defaults, params)
    }
}

/// Wrap any handle into a preset handle of the same kind.
pub fn preset_handle(base: PluginHandle, defaults: Value) -> PluginHandle {
    match base {
        PluginHandle::Loader(p) => PluginHandle::Loader(Arc::new(Preset::new(p, defaults))),
        PluginHandle::Transformer(p) => PluginHandle::Transformer(Arc::new(Preset::new(p, defaults))),
        PluginHandle::Exporter(p) => PluginHandle::Exporter(Arc::new(Preset::new(p, defaults))),
        PluginHandle::Widget(p) => PluginHandle::Widget(Arc::new(Preset::new(p, defaults))),
    }
}

#[async_trait]
impl Loader for Preset<dyn Loader> {
    fn param_schema(&self) -> Value {
        preset_schema(&self.base.param_schema(), &self.defaults)
    }

    async fn load(&self, store: &Store, params: &Value) -> Result<Vec<Record>, WidgetError> {
        self.base.load(store, &self.params(params)).await
    }
}

#[async_trait]
impl Transformer for Preset<dyn Transformer> {
    fn param_schema(&self) -> Value {
        preset_schema(&self.base.param_schema(), &self.defaults)
    }

    async fn transform(&self, input: &WidgetInput<'_>, params: &Value) -> Result<Value, WidgetError> {
        self.base.transform(input, &self.params(params)).await
    }
}

impl Exporter for Preset<dyn Exporter> {
    fn param_schema(&self) -> Value {
        preset_schema(&self.base.param_schema(), &self.defaults)
    }

    fn export(
        &self,
        target: &ExportTarget,
        results: &IndexMap<String, Vec<WidgetResult>>,
        registry: &PluginRegistry,
    ) -> Result<ExportOutcome, WidgetError> {
        let mut target = target.clone();
        target.params = self.params(&target.params);
        self.base.export(&target, results, registry)
    }
}

impl Widget for Preset<dyn Widget> {
    fn param_schema(&self) -> Value {
        preset_schema(&self.base.param_schema(), &self.defaults)
    }

    fn data_schema(&self) -> Value {
        self.base.data_schema()
    }
}
