//! `top_ranking`: most frequent values among an entity's records.
//!
//! Three ways to turn a record value into a label:
//!
//! - `direct` - the value itself
//! - `hierarchical` - the value is an entity id; count its ancestor at
//!   `target_rank` instead (a record on a species counts for its family)
//! - `join` - look the value up in another source and use its label field
//!
//! Values that are missing or do not resolve are skipped. Ties keep the
//! order in which labels were first seen. Hierarchical counts are kept per
//! ancestor id, so two ancestors sharing a label are ranked separately.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::config::{HierarchySpec, SourceRef};
use crate::error::WidgetError;
use crate::models::{record_key, value_key};
use crate::plugins::{Transformer, WidgetInput};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMode {
    #[default]
    Direct,
    Hierarchical,
    Join,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lookup {
    pub source: SourceRef,
    pub key: String,
    pub label: String,
}

fn default_count() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingParams {
    pub field: String,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub mode: RankingMode,
    #[serde(default)]
    pub target_rank: Option<String>,
    #[serde(default)]
    pub hierarchy: Option<HierarchySpec>,
    #[serde(default)]
    pub lookup: Option<Lookup>,
}

/// Count labels, keep the `count` largest (first seen wins ties).
pub fn top_counts<I>(labels: I, count: usize) -> Vec<(String, u64)>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: IndexMap<String, u64> = IndexMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    // Stable: equal counts stay in first-seen order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(count);
    ranked
}

pub struct TopRanking;

#[async_trait]
impl Transformer for TopRanking {
    fn param_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["field"],
            "properties": {
                "field": { "type": "string" },
                "count": { "type": "integer", "minimum": 1 },
                "mode": { "enum": ["direct", "hierarchical", "join"] },
                "target_rank": { "type": "string" },
                "hierarchy": {
                    "type": "object",
                    "required": ["source"],
                    "properties": {
                        "source": {},
                        "id_field": { "type": "string" },
                        "parent_field": { "type": "string" },
                        "rank_field": { "type": "string" },
                        "label_field": { "type": "string" },
                        "order_field": { "type": "string" }
                    }
                },
                "lookup": {
                    "type": "object",
                    "required": ["source", "key", "label"],
                    "properties": {
                        "source": {},
                        "key": { "type": "string" },
                        "label": { "type": "string" }
                    }
                }
            }
        })
    }

    async fn transform(&self, input: &WidgetInput<'_>, params: &Value) -> Result<Value, WidgetError> {
        let params: RankingParams = serde_json::from_value(params.clone()).map_err(WidgetError::params)?;
        let values = input.records.iter().filter_map(|r| record_key(r, &params.field));

        let ranked = match params.mode {
            RankingMode::Direct => top_counts(values, params.count),

            RankingMode::Hierarchical => {
                let target_rank = params.target_rank.as_deref().ok_or_else(|| {
                    WidgetError::InvalidParams("hierarchical mode needs 'target_rank'".into())
                })?;
                let spec = params.hierarchy.as_ref().ok_or_else(|| {
                    WidgetError::InvalidParams("hierarchical mode needs 'hierarchy'".into())
                })?;
                let hierarchy = input.run.hierarchy(spec).await?;
                // Count ancestors by id: homonyms stay apart.
                let ancestors = values.filter_map(|id| {
                    hierarchy
                        .ancestor_at_rank(&id, target_rank)
                        .map(|e| e.id.clone())
                });
                top_counts(ancestors, params.count)
                    .into_iter()
                    .filter_map(|(id, count)| hierarchy.get(&id).map(|e| (e.label.clone(), count)))
                    .collect()
            }

            RankingMode::Join => {
                let lookup = params.lookup.as_ref().ok_or_else(|| {
                    WidgetError::InvalidParams("join mode needs 'lookup'".into())
                })?;
                let records = input.run.load_source(&lookup.source).await?;
                let mut labels: HashMap<String, String> = HashMap::with_capacity(records.len());
                for record in records.iter() {
                    if let (Some(key), Some(label)) = (
                        record_key(record, &lookup.key),
                        record.get(&lookup.label).and_then(value_key),
                    ) {
                        labels.entry(key).or_insert(label);
                    }
                }
                top_counts(values.filter_map(|v| labels.get(&v).cloned()), params.count)
            }
        };

        Ok(Value::Array(
            ranked
                .into_iter()
                .map(|(label, count)| json!({ "label": label, "count": count }))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin::testing::Harness;

    fn labels(value: &Value) -> Vec<(String, u64)> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| (v["label"].as_str().unwrap().to_string(), v["count"].as_u64().unwrap()))
            .collect()
    }

    #[test]
    fn test_top_counts_tie_break() {
        let labels = ["b", "a", "b", "c", "a", "d"].map(String::from);
        assert_eq!(
            top_counts(labels, 3),
            vec![("b".into(), 2), ("a".into(), 2), ("c".into(), 1)]
        );
    }

    #[tokio::test]
    async fn test_hierarchical_ranking() {
        // F1 ─ G1 ─ S1, S2     F2 ─ G2 ─ S3
        let taxonomy = json!([
            { "id": "F1", "parent_id": null, "rank": "family", "label": "F1" },
            { "id": "G1", "parent_id": "F1", "rank": "genus", "label": "G1" },
            { "id": "S1", "parent_id": "G1", "rank": "species", "label": "S1" },
            { "id": "S2", "parent_id": "G1", "rank": "species", "label": "S2" },
            { "id": "F2", "parent_id": null, "rank": "family", "label": "F2" },
            { "id": "G2", "parent_id": "F2", "rank": "genus", "label": "G2" },
            { "id": "S3", "parent_id": "G2", "rank": "species", "label": "S3" }
        ]);
        let harness = Harness::new().await;
        let records = Harness::records(json!([
            { "taxon": "S1" }, { "taxon": "S2" }, { "taxon": "S3" }, { "taxon": "G1" },
            { "taxon": "S1" }, { "taxon": "G2" }, { "taxon": "S2" },
            { "taxon": "unknown" }, { "taxon": null }, {}
        ]));
        let params = json!({
            "field": "taxon",
            "count": 10,
            "mode": "hierarchical",
            "target_rank": "family",
            "hierarchy": { "source": { "loader": "inline", "params": { "records": taxonomy } } }
        });

        let out = harness.transform(&TopRanking, &records, &params).await.unwrap();
        assert_eq!(labels(&out), vec![("F1".into(), 5), ("F2".into(), 2)]);
    }

    #[tokio::test]
    async fn test_hierarchical_top_two_families() {
        let taxonomy = json!([
            { "id": "F1", "parent_id": null, "rank": "family", "label": "F1" },
            { "id": "F2", "parent_id": null, "rank": "family", "label": "F2" },
            { "id": "F3", "parent_id": null, "rank": "family", "label": "F3" },
            { "id": "sp1", "parent_id": "F1", "rank": "species", "label": "sp1" },
            { "id": "sp2", "parent_id": "F1", "rank": "species", "label": "sp2" },
            { "id": "sp3", "parent_id": "F2", "rank": "species", "label": "sp3" },
            { "id": "sp4", "parent_id": "F3", "rank": "species", "label": "sp4" }
        ]);
        let harness = Harness::new().await;
        let records = Harness::records(json!([
            { "taxon": "sp1" }, { "taxon": "sp1" }, { "taxon": "sp1" },
            { "taxon": "sp2" }, { "taxon": "sp2" },
            { "taxon": "sp3" }, { "taxon": "sp3" },
            { "taxon": "sp4" }
        ]));
        let params = json!({
            "field": "taxon",
            "count": 2,
            "mode": "hierarchical",
            "target_rank": "family",
            "hierarchy": { "source": { "loader": "inline", "params": { "records": taxonomy } } }
        });

        let out = harness.transform(&TopRanking, &records, &params).await.unwrap();
        assert_eq!(labels(&out), vec![("F1".into(), 5), ("F2".into(), 2)]);
    }

    #[tokio::test]
    async fn test_homonym_ancestors_are_counted_apart() {
        let taxonomy = json!([
            { "id": "A", "parent_id": null, "rank": "family", "label": "Incertae sedis" },
            { "id": "B", "parent_id": null, "rank": "family", "label": "Incertae sedis" },
            { "id": "a1", "parent_id": "A", "rank": "species", "label": "a1" },
            { "id": "b1", "parent_id": "B", "rank": "species", "label": "b1" }
        ]);
        let harness = Harness::new().await;
        let records = Harness::records(json!([
            { "taxon": "a1" }, { "taxon": "b1" }, { "taxon": "a1" }
        ]));
        let params = json!({
            "field": "taxon",
            "mode": "hierarchical",
            "target_rank": "family",
            "hierarchy": { "source": { "loader": "inline", "params": { "records": taxonomy } } }
        });

        let out = harness.transform(&TopRanking, &records, &params).await.unwrap();
        assert_eq!(
            labels(&out),
            vec![("Incertae sedis".into(), 2), ("Incertae sedis".into(), 1)]
        );
    }

    #[tokio::test]
    async fn test_direct_and_join_modes() {
        let harness = Harness::new().await;
        let records = Harness::records(json!([
            { "plot": 2 }, { "plot": 1 }, { "plot": 2 }, { "plot": 9 }
        ]));

        let direct = harness
            .transform(&TopRanking, &records, &json!({ "field": "plot", "count": 1 }))
            .await
            .unwrap();
        assert_eq!(labels(&direct), vec![("2".into(), 2)]);

        let params = json!({
            "field": "plot",
            "mode": "join",
            "lookup": {
                "source": { "loader": "inline", "params": { "records": [
                    { "id": 1, "name": "Plot A" }, { "id": 2, "name": "Plot B" }
                ] } },
                "key": "id",
                "label": "name"
            }
        });
        let joined = harness.transform(&TopRanking, &records, &params).await.unwrap();
        assert_eq!(labels(&joined), vec![("Plot B".into(), 2), ("Plot A".into(), 1)]);
    }

    #[tokio::test]
    async fn test_hierarchical_mode_needs_target_rank() {
        let harness = Harness::new().await;
        let err = harness
            .transform(&TopRanking, &[], &json!({ "field": "taxon", "mode": "hierarchical" }))
            .await
            .unwrap_err();
        assert!(matches!(err, WidgetError::InvalidParams(_)));
    }
}
