//! Transform engine.
//!
//! Each group runs through the same stages:
//!
//! ```text
//! ResolveSource ──▶ Join ──▶ OrderWidgets ──▶ ExecuteEach ──▶ Persist
//!  primary records   aux      depends_on       entity × widget   one transaction
//!  + hierarchy       sources  graph            × step
//! ```
//!
//! Groups run concurrently and independently: an error in one stage fails
//! that group only. Inside a group, entities and widgets run sequentially.
//! A plugin failure is stored as an error marker on that widget's result;
//! only a `required` widget aborts its group.

use chrono::Utc;
use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::context::RunContext;
use super::ordering::execution_order;
use super::sources::{apply_join, by_identifier, SubtreeIndex};
use super::summary::{GroupStatus, GroupSummary, RunSummary, WidgetFailure, WidgetSummary};
use crate::config::{GroupConfig, ImportConfig, ProjectConfig, TransformConfig, WidgetConfig};
use crate::error::{EngineError, EngineResult, WidgetError};
use crate::hierarchy::Hierarchy;
use crate::logs::{log_error, log_info, log_info_indent, log_success, log_warning_indent};
use crate::models::{Entity, ErrorMarker, Record, WidgetResult};
use crate::plugins::{PluginRegistry, WidgetInput};
use crate::store::Store;

/// Processing stages of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStage {
    ResolveSource,
    Join,
    OrderWidgets,
    ExecuteEach,
    Persist,
}

impl fmt::Display for GroupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupStage::ResolveSource => "resolve_source",
            GroupStage::Join => "join",
            GroupStage::OrderWidgets => "order_widgets",
            GroupStage::ExecuteEach => "execute_each",
            GroupStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

fn enter(group: &str, stage: GroupStage) {
    tracing::debug!(group, stage = %stage, "group stage");
}

/// What a completed group produced.
struct GroupOutcome {
    entities: usize,
    results: usize,
    widgets: Vec<WidgetSummary>,
}

/// Runs transform groups against a store.
pub struct TransformEngine {
    transform: Arc<TransformConfig>,
    import: Arc<ImportConfig>,
    registry: Arc<PluginRegistry>,
    store: Arc<Store>,
}

impl TransformEngine {
    pub fn new(project: &ProjectConfig, registry: Arc<PluginRegistry>, store: Arc<Store>) -> Self {
        Self {
            transform: Arc::new(project.transform.clone()),
            import: Arc::new(project.import.clone()),
            registry,
            store,
        }
    }

    /// Run one group, or every group when `group` is `None`.
    ///
    /// Only an unknown group name or an unusable store fail the call;
    /// everything else is reported per group in the summary.
    pub async fn run(&self, group: Option<&str>) -> EngineResult<RunSummary> {
        let groups: Vec<&GroupConfig> = match group {
            Some(name) => vec![self
                .transform
                .group(name)
                .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))?],
            None => self.transform.groups.iter().collect(),
        };
        self.store.ensure_schema().await?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        log_info(format!("Run {}: {} group(s)", run_id, groups.len()));

        let context = RunContext::new(self.store.clone(), self.registry.clone(), self.import.clone());
        let summaries = join_all(groups.into_iter().map(|g| self.run_group(&context, g))).await;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            groups: summaries,
        };
        if summary.is_success() {
            log_success(format!("Run {} finished", run_id));
        } else {
            log_error(format!("Run {} finished with failed groups", run_id));
        }
        Ok(summary)
    }

    async fn run_group(&self, context: &RunContext, group: &GroupConfig) -> GroupSummary {
        let started = Instant::now();
        log_info_indent(format!("Group '{}'", group.group_by), 1);

        let outcome = self.process_group(context, group).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) => {
                log_success(format!(
                    "Group '{}': {} entities, {} results",
                    group.group_by, outcome.entities, outcome.results
                ));
                GroupSummary {
                    group_by: group.group_by.clone(),
                    status: GroupStatus::Completed,
                    entities: outcome.entities,
                    results: outcome.results,
                    widgets: outcome.widgets,
                    error: None,
                    duration_ms,
                }
            }
            Err(error) => {
                log_error(format!("Group '{}' failed: {}", group.group_by, error));
                GroupSummary {
                    group_by: group.group_by.clone(),
                    status: GroupStatus::Failed,
                    entities: 0,
                    results: 0,
                    widgets: Vec::new(),
                    error: Some(ErrorMarker {
                        kind: error.kind(),
                        message: error.to_string(),
                    }),
                    duration_ms,
                }
            }
        }
    }

    async fn process_group(&self, context: &RunContext, group: &GroupConfig) -> EngineResult<GroupOutcome> {
        let name = group.group_by.as_str();

        enter(name, GroupStage::ResolveSource);
        let primary = context.load_source(&group.source).await?;
        let hierarchy = match &group.hierarchy {
            Some(spec) => Some(context.hierarchy(spec).await?),
            None => None,
        };

        enter(name, GroupStage::Join);
        let mut records: Vec<Record> = primary.as_ref().clone();
        for join in &group.joins {
            let aux = context.load_source(&join.source).await?;
            records = apply_join(records, &aux, join);
        }

        enter(name, GroupStage::OrderWidgets);
        let order = execution_order(name, &group.widgets)?;

        enter(name, GroupStage::ExecuteEach);
        let subtrees;
        let flat;
        let entities: Vec<(&str, &[Record])> = match &hierarchy {
            Some(hierarchy) => {
                subtrees = SubtreeIndex::new(records, &group.identifier, hierarchy);
                hierarchy
                    .entities()
                    .iter()
                    .map(|e| (e.id.as_str(), subtrees.records_of(e)))
                    .collect()
            }
            None => {
                flat = by_identifier(records, &group.identifier);
                flat.iter().map(|(id, rs)| (id.as_str(), rs.as_slice())).collect()
            }
        };

        let mut widgets: IndexMap<&str, WidgetSummary> =
            order.iter().map(|w| (w.as_str(), WidgetSummary::new(w))).collect();
        let mut results = Vec::with_capacity(entities.len() * order.len());

        for &(entity_id, entity_records) in &entities {
            let entity = EntityScope {
                group,
                entity_id,
                entity: hierarchy.as_deref().and_then(|h| h.get(entity_id)),
                hierarchy: hierarchy.as_deref(),
                records: entity_records,
            };

            let mut produced: IndexMap<String, WidgetResult> = IndexMap::new();
            for widget_name in &order {
                let widget = &group.widgets[widget_name.as_str()];
                let result = match self.run_widget(context, &entity, widget_name, widget, &produced).await {
                    Ok(value) => WidgetResult::success(name, entity_id, widget_name, value),
                    Err(error) if widget.required => {
                        return Err(EngineError::RequiredWidgetFailed {
                            widget: widget_name.clone(),
                            entity_id: entity_id.to_string(),
                            error,
                        });
                    }
                    Err(error) => {
                        log_warning_indent(
                            format!("{} / {} / {}: {}", name, entity_id, widget_name, error),
                            2,
                        );
                        WidgetResult::failure(name, entity_id, widget_name, error.kind(), error.to_string())
                    }
                };

                if let Some(summary) = widgets.get_mut(widget_name.as_str()) {
                    match &result.error {
                        None => summary.succeeded += 1,
                        Some(marker) => {
                            summary.failed += 1;
                            summary.failures.push(WidgetFailure {
                                entity_id: entity_id.to_string(),
                                kind: marker.kind,
                                message: marker.message.clone(),
                            });
                        }
                    }
                }
                produced.insert(widget_name.clone(), result);
            }
            results.extend(produced.into_values());
        }

        enter(name, GroupStage::Persist);
        context.store().persist_group(name, &results).await?;

        Ok(GroupOutcome {
            entities: entities.len(),
            results: results.len(),
            widgets: widgets.into_values().collect(),
        })
    }

    /// Run every step of one widget for one entity, chaining outputs.
    async fn run_widget(
        &self,
        context: &RunContext,
        scope: &EntityScope<'_>,
        widget_name: &str,
        widget: &WidgetConfig,
        produced: &IndexMap<String, WidgetResult>,
    ) -> Result<Value, WidgetError> {
        let mut dependencies = IndexMap::new();
        for dependency in &widget.depends_on {
            match produced.get(dependency) {
                Some(result) if !result.is_error() => {
                    dependencies.insert(dependency.clone(), result.value.clone());
                }
                _ => return Err(WidgetError::DependencyFailed(dependency.clone())),
            }
        }

        let steps = widget.steps();
        if steps.is_empty() {
            return Err(WidgetError::InvalidParams("widget has no plugin and no steps".into()));
        }

        let mut previous: Option<Value> = None;
        let mut chained: Option<Vec<Record>> = None;
        for step in &steps {
            let transformer = self.registry.transformer(&step.plugin)?;
            tracing::trace!(
                group = %scope.group.group_by,
                entity = %scope.entity_id,
                widget = widget_name,
                plugin = %step.plugin,
                "running step"
            );
            let input = WidgetInput {
                group_by: &scope.group.group_by,
                widget: widget_name,
                entity_id: scope.entity_id,
                entity: scope.entity,
                hierarchy: scope.hierarchy,
                records: chained.as_deref().unwrap_or(scope.records),
                previous: previous.as_ref(),
                dependencies: &dependencies,
                run: context,
            };
            let value = transformer.transform(&input, &step.params).await?;
            chained = step_records(&value);
            previous = Some(value);
        }
        Ok(previous.unwrap_or(Value::Null))
    }
}

/// Rows a step hands to the next one: a list of objects replaces the
/// entity's records, anything else leaves them in place.
fn step_records(value: &Value) -> Option<Vec<Record>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_object().cloned())
        .collect()
}

/// The entity currently being processed.
struct EntityScope<'a> {
    group: &'a GroupConfig,
    entity_id: &'a str,
    entity: Option<&'a Entity>,
    hierarchy: Option<&'a Hierarchy>,
    records: &'a [Record],
}
