//! Nested-set hierarchy builder.
//!
//! Converts flat parent-linked rows into an interval-encoded tree:
//!
//! ```text
//!  (1, -, family)            1 [family]  1..6
//!  (2, 1, genus)     ──▶       2 [genus]   2..5
//!  (3, 2, species)               3 [species] 3..4
//! ```
//!
//! Each entity gets `left` on entry and `right` on exit of a depth-first
//! traversal, so ancestor/descendant questions become interval containment.
//! The whole table is rebuilt in one pass whenever parent links change;
//! there is no incremental patching.

mod rows;
mod table;

pub use rows::{rows_from_records, HierarchyRow};
pub use table::EntityTable;

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{HierarchyError, HierarchyResult};
use crate::models::Entity;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    White,
    Gray,
    Black,
}

/// Sibling order: explicit order key first (present before absent), then
/// rank, then label. Sorting is stable so input order settles the rest.
fn sibling_order(a: &HierarchyRow, b: &HierarchyRow) -> Ordering {
    let by_key = match (a.order_key, b.order_key) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_key
        .then_with(|| a.rank.cmp(&b.rank))
        .then_with(|| a.label.cmp(&b.label))
}

/// Build an interval-encoded hierarchy from parent-linked rows.
///
/// Fails on duplicate ids, parents that do not exist, and cycles in the
/// parent links.
pub fn build_hierarchy(rows: Vec<HierarchyRow>) -> HierarchyResult<Hierarchy> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if index.insert(row.id.clone(), i).is_some() {
            return Err(HierarchyError::DuplicateEntity(row.id.clone()));
        }
    }

    let mut parent_of: Vec<Option<usize>> = Vec::with_capacity(rows.len());
    for row in &rows {
        let parent = match &row.parent_id {
            None => None,
            Some(pid) => Some(*index.get(pid).ok_or_else(|| HierarchyError::UnknownParent {
                id: row.id.clone(),
                parent: pid.clone(),
            })?),
        };
        parent_of.push(parent);
    }

    detect_cycles(&rows, &parent_of)?;

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
    let mut roots = Vec::new();
    for (i, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }
    roots.sort_by(|&a, &b| sibling_order(&rows[a], &rows[b]));
    for list in &mut children {
        list.sort_by(|&a, &b| sibling_order(&rows[a], &rows[b]));
    }

    // Iterative DFS: (node, next child position).
    let mut left = vec![0u32; rows.len()];
    let mut right = vec![0u32; rows.len()];
    let mut level = vec![0u32; rows.len()];
    let mut preorder = Vec::with_capacity(rows.len());
    let mut counter = 1u32;

    for &root in &roots {
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        left[root] = counter;
        counter += 1;
        preorder.push(root);

        while let Some((node, cursor)) = stack.last_mut() {
            let node = *node;
            if let Some(&child) = children[node].get(*cursor) {
                *cursor += 1;
                left[child] = counter;
                counter += 1;
                level[child] = level[node] + 1;
                preorder.push(child);
                stack.push((child, 0));
            } else {
                right[node] = counter;
                counter += 1;
                stack.pop();
            }
        }
    }

    let mut slots: Vec<Option<HierarchyRow>> = rows.into_iter().map(Some).collect();
    let entities: Vec<Entity> = preorder
        .into_iter()
        .filter_map(|i| {
            slots[i].take().map(|row| Entity {
                id: row.id,
                label: row.label,
                rank: row.rank,
                parent_id: row.parent_id,
                left: left[i],
                right: right[i],
                level: level[i],
                attributes: row.attributes,
            })
        })
        .collect();

    Ok(Hierarchy::from_entities(entities))
}

/// White/gray/black walk over parent links.
///
/// Every node has at most one parent, so walking upwards from each
/// unvisited node and meeting a gray node means the walk closed a loop.
fn detect_cycles(rows: &[HierarchyRow], parent_of: &[Option<usize>]) -> HierarchyResult<()> {
    let mut state = vec![Visit::White; rows.len()];
    let mut path = Vec::new();

    for start in 0..rows.len() {
        if state[start] != Visit::White {
            continue;
        }
        path.clear();
        let mut current = Some(start);
        while let Some(node) = current {
            match state[node] {
                Visit::Gray => {
                    return Err(HierarchyError::CyclicHierarchy {
                        id: rows[node].id.clone(),
                    })
                }
                Visit::Black => break,
                Visit::White => {
                    state[node] = Visit::Gray;
                    path.push(node);
                    current = parent_of[node];
                }
            }
        }
        for &node in &path {
            state[node] = Visit::Black;
        }
    }
    Ok(())
}

// =============================================================================
// Hierarchy
// =============================================================================

/// A built hierarchy. Entities are stored in preorder (ascending `left`),
/// so every subtree is a contiguous slice.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
    by_rank: HashMap<String, Vec<usize>>,
}

impl Hierarchy {
    fn from_entities(entities: Vec<Entity>) -> Self {
        let mut index = HashMap::with_capacity(entities.len());
        let mut by_rank: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entity) in entities.iter().enumerate() {
            index.insert(entity.id.clone(), i);
            by_rank.entry(entity.rank.clone()).or_default().push(i);
        }
        Self { entities, index, by_rank }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).map(|&i| &self.entities[i])
    }

    pub fn roots(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.parent_id.is_none())
    }

    /// Direct children in sibling order.
    pub fn children(&self, id: &str) -> Vec<&Entity> {
        let Some(parent) = self.get(id) else {
            return Vec::new();
        };
        self.descendants(id)
            .iter()
            .filter(|e| e.level == parent.level + 1)
            .collect()
    }

    /// All descendants, excluding the entity itself.
    pub fn descendants(&self, id: &str) -> &[Entity] {
        match self.index.get(id) {
            Some(&i) => {
                let count = self.entities[i].descendant_count() as usize;
                &self.entities[i + 1..i + 1 + count]
            }
            None => &[],
        }
    }

    /// Ids of the entity and all its descendants.
    pub fn subtree_ids(&self, id: &str) -> Vec<&str> {
        match self.get(id) {
            Some(entity) => std::iter::once(entity)
                .chain(self.descendants(id))
                .map(|e| e.id.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ancestors from the root down to the direct parent.
    pub fn ancestors(&self, id: &str) -> Vec<&Entity> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|e| e.parent_id.as_deref());
        while let Some(pid) = current {
            match self.get(pid) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent.parent_id.as_deref();
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// The entity of `rank` whose interval contains `id`'s interval.
    ///
    /// An entity already at `rank` resolves to itself.
    pub fn ancestor_at_rank(&self, id: &str, rank: &str) -> Option<&Entity> {
        let leaf = self.get(id)?;
        let candidates = self.by_rank.get(rank)?;
        // Candidates are in ascending `left`; the containing one starts at or before the leaf.
        let end = candidates.partition_point(|&i| self.entities[i].left <= leaf.left);
        candidates[..end]
            .iter()
            .rev()
            .map(|&i| &self.entities[i])
            .find(|candidate| candidate.contains(leaf))
    }

    /// Whether `descendant` lies in the subtree of `ancestor` (inclusive).
    pub fn contains(&self, ancestor: &str, descendant: &str) -> bool {
        match (self.get(ancestor), self.get(descendant)) {
            (Some(a), Some(d)) => a.contains(d),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, parent: Option<&str>, rank: &str, label: &str) -> HierarchyRow {
        HierarchyRow::new(id, parent, rank).with_label(label)
    }

    fn taxonomy() -> Vec<HierarchyRow> {
        vec![
            row("10", None, "family", "Myrtaceae"),
            row("11", Some("10"), "genus", "Syzygium"),
            row("12", Some("11"), "species", "Syzygium acre"),
            row("13", Some("11"), "species", "Syzygium austro"),
            row("20", None, "family", "Araucariaceae"),
            row("21", Some("20"), "genus", "Araucaria"),
            row("22", Some("21"), "species", "Araucaria columnaris"),
            row("14", Some("10"), "genus", "Eugenia"),
        ]
    }

    fn assert_nested_set_invariants(h: &Hierarchy) {
        for e in h.entities() {
            assert!(e.left < e.right, "{} has left >= right", e.id);
            if let Some(pid) = &e.parent_id {
                let p = h.get(pid).unwrap();
                assert!(p.left < e.left && e.right < p.right, "{} escapes {}", e.id, pid);
                assert_eq!(e.level, p.level + 1);
            }
        }
        for e in h.entities() {
            let kids = h.children(&e.id);
            for pair in kids.windows(2) {
                assert!(pair[0].right < pair[1].left);
            }
        }
    }

    #[test]
    fn test_spec_chain_example() {
        let h = build_hierarchy(vec![
            HierarchyRow::new("1", None, "family"),
            HierarchyRow::new("2", Some("1"), "genus"),
            HierarchyRow::new("3", Some("2"), "species"),
        ])
        .unwrap();

        let intervals: Vec<_> = ["1", "2", "3"]
            .iter()
            .map(|id| {
                let e = h.get(id).unwrap();
                (e.left, e.right, e.level)
            })
            .collect();
        assert_eq!(intervals, vec![(1, 6, 0), (2, 5, 1), (3, 4, 2)]);
    }

    #[test]
    fn test_invariants_hold_on_forest() {
        let h = build_hierarchy(taxonomy()).unwrap();
        assert_eq!(h.len(), 8);
        assert_nested_set_invariants(&h);
        // Counter covers 1..=2n with no gaps.
        let max_right = h.entities().iter().map(|e| e.right).max().unwrap();
        assert_eq!(max_right, 16);
    }

    #[test]
    fn test_sibling_order_is_by_rank_then_label() {
        let h = build_hierarchy(taxonomy()).unwrap();
        let roots: Vec<_> = h.roots().map(|e| e.label.as_str()).collect();
        assert_eq!(roots, vec!["Araucariaceae", "Myrtaceae"]);

        let genera: Vec<_> = h.children("10").iter().map(|e| e.label.as_str()).collect();
        assert_eq!(genera, vec!["Eugenia", "Syzygium"]);
    }

    #[test]
    fn test_order_key_precedes_label() {
        let h = build_hierarchy(vec![
            row("a", None, "family", "Alpha").with_order(Some(2)),
            row("b", None, "family", "Beta").with_order(Some(1)),
            row("c", None, "family", "Aardvark"),
        ])
        .unwrap();
        let roots: Vec<_> = h.roots().map(|e| e.id.as_str()).collect();
        assert_eq!(roots, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_build_is_deterministic_under_input_permutation() {
        let forward = build_hierarchy(taxonomy()).unwrap();
        let mut reversed_rows = taxonomy();
        reversed_rows.reverse();
        let reversed = build_hierarchy(reversed_rows).unwrap();
        assert_eq!(forward.entities(), reversed.entities());
    }

    #[test]
    fn test_cycle_detected() {
        let err = build_hierarchy(vec![
            HierarchyRow::new("root", None, "family"),
            HierarchyRow::new("a", Some("b"), "genus"),
            HierarchyRow::new("b", Some("c"), "genus"),
            HierarchyRow::new("c", Some("a"), "genus"),
        ])
        .unwrap_err();
        assert!(matches!(err, HierarchyError::CyclicHierarchy { .. }));
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let err = build_hierarchy(vec![HierarchyRow::new("x", Some("x"), "genus")]).unwrap_err();
        assert_eq!(err, HierarchyError::CyclicHierarchy { id: "x".into() });
    }

    #[test]
    fn test_unknown_parent_and_duplicates() {
        let err = build_hierarchy(vec![HierarchyRow::new("a", Some("ghost"), "genus")]).unwrap_err();
        assert!(matches!(err, HierarchyError::UnknownParent { .. }));

        let err = build_hierarchy(vec![
            HierarchyRow::new("a", None, "family"),
            HierarchyRow::new("a", None, "family"),
        ])
        .unwrap_err();
        assert_eq!(err, HierarchyError::DuplicateEntity("a".into()));
    }

    #[test]
    fn test_ancestor_at_rank() {
        let h = build_hierarchy(taxonomy()).unwrap();
        assert_eq!(h.ancestor_at_rank("12", "family").unwrap().id, "10");
        assert_eq!(h.ancestor_at_rank("22", "family").unwrap().id, "20");
        assert_eq!(h.ancestor_at_rank("22", "genus").unwrap().id, "21");
        assert_eq!(h.ancestor_at_rank("11", "genus").unwrap().id, "11");
        assert!(h.ancestor_at_rank("10", "species").is_none());
        assert!(h.ancestor_at_rank("missing", "family").is_none());
    }

    #[test]
    fn test_subtree_queries() {
        let h = build_hierarchy(taxonomy()).unwrap();
        let mut ids = h.subtree_ids("11");
        ids.sort();
        assert_eq!(ids, vec!["11", "12", "13"]);
        assert!(h.descendants("22").is_empty());
        assert!(h.contains("10", "13"));
        assert!(!h.contains("20", "13"));

        let path: Vec<_> = h.ancestors("13").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(path, vec!["10", "11"]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut rows = vec![HierarchyRow::new("0", None, "r")];
        for i in 1..20_000 {
            let parent = (i - 1).to_string();
            rows.push(HierarchyRow::new(&i.to_string(), Some(parent.as_str()), "r"));
        }
        let h = build_hierarchy(rows).unwrap();
        assert_eq!(h.get("19999").unwrap().level, 19_999);
        assert_eq!(h.get("0").unwrap().right, 40_000);
    }
}
