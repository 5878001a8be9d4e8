//! Widget execution order.
//!
//! `depends_on` edges form a graph (`dependency → dependent`). The order is
//! Kahn's algorithm where, among the widgets ready at a given moment, the
//! one declared first in configuration runs first. Widgets without
//! dependencies therefore keep their declared order.

use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::BTreeSet;

use crate::config::WidgetConfig;
use crate::error::{EngineError, EngineResult};

/// Widget names in execution order.
///
/// Fails with `UnknownDependency` when `depends_on` names a widget that is
/// not in the group, and with `CyclicWidgetDependency` listing every widget
/// that sits on a cycle.
pub fn execution_order(group: &str, widgets: &IndexMap<String, WidgetConfig>) -> EngineResult<Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::with_capacity(widgets.len(), widgets.len());
    for name in widgets.keys() {
        graph.add_node(name.as_str());
    }
    for (i, (name, widget)) in widgets.iter().enumerate() {
        for dependency in &widget.depends_on {
            let j = widgets
                .get_index_of(dependency)
                .ok_or_else(|| EngineError::UnknownDependency {
                    widget: name.clone(),
                    dependency: dependency.clone(),
                })?;
            graph.update_edge(NodeIndex::new(j), NodeIndex::new(i), ());
        }
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    // Node indices follow declaration order.
    let mut ready: BTreeSet<usize> = (0..widgets.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(widgets.len());

    while let Some(i) = ready.pop_first() {
        order.push(graph[NodeIndex::new(i)].to_string());
        for next in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert(next.index());
            }
        }
    }

    if order.len() < widgets.len() {
        let mut members: Vec<NodeIndex> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .collect();
        members.sort();
        return Err(EngineError::CyclicWidgetDependency {
            group: group.to_string(),
            widgets: members.into_iter().map(|n| graph[n].to_string()).collect(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widgets(deps: &[(&str, &[&str])]) -> IndexMap<String, WidgetConfig> {
        deps.iter()
            .map(|(name, on)| (name.to_string(), WidgetConfig::single("field_stats", json!({})).depends_on(on)))
            .collect()
    }

    #[test]
    fn test_declared_order_without_dependencies() {
        let order = execution_order("g", &widgets(&[("c", &[]), ("a", &[]), ("b", &[])])).unwrap();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependencies_first_then_declared_order() {
        let order = execution_order(
            "g",
            &widgets(&[("map", &["stats"]), ("info", &[]), ("stats", &["info"]), ("extra", &[])]),
        )
        .unwrap();
        assert_eq!(order, vec!["info", "stats", "map", "extra"]);
    }

    #[test]
    fn test_cycle_lists_members_only() {
        let err = execution_order(
            "taxon",
            &widgets(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &["a"]), ("e", &[])]),
        )
        .unwrap_err();
        match err {
            EngineError::CyclicWidgetDependency { group, widgets } => {
                assert_eq!(group, "taxon");
                assert_eq!(widgets, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_and_unknown_dependency() {
        let err = execution_order("g", &widgets(&[("a", &["a"])])).unwrap_err();
        assert!(matches!(err, EngineError::CyclicWidgetDependency { ref widgets, .. } if widgets == &["a"]));

        let err = execution_order("g", &widgets(&[("a", &["ghost"])])).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDependency { ref dependency, .. } if dependency == "ghost"));
    }
}
