//! Join auxiliary sources and split records per entity.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::config::{JoinSpec, JoinType};
use crate::hierarchy::Hierarchy;
use crate::models::{record_key, Entity, Record};

/// Attach `aux` records to every primary record, SQL style.
///
/// - several matches produce one merged record per match
/// - no match keeps the primary record (`left`) or drops it (`inner`)
/// - auxiliary fields get the join prefix; an existing primary field is
///   never overwritten
pub fn apply_join(primary: Vec<Record>, aux: &[Record], spec: &JoinSpec) -> Vec<Record> {
    let mut index: HashMap<String, Vec<&Record>> = HashMap::new();
    for record in aux {
        if let Some(key) = record_key(record, spec.foreign_key()) {
            index.entry(key).or_default().push(record);
        }
    }

    let mut joined = Vec::with_capacity(primary.len());
    for record in primary {
        let matches = record_key(&record, &spec.key).and_then(|k| index.get(&k));
        match matches {
            Some(matches) => {
                for aux_record in matches {
                    let mut merged = record.clone();
                    for (field, value) in aux_record.iter() {
                        let name = format!("{}{}", spec.prefix, field);
                        if !merged.contains_key(&name) {
                            merged.insert(name, value.clone());
                        }
                    }
                    joined.push(merged);
                }
            }
            None if spec.join_type == JoinType::Left => joined.push(record),
            None => {}
        }
    }
    joined
}

/// Records per identifier value, in first-seen order.
///
/// Records without a usable identifier belong to no entity.
pub fn by_identifier(records: Vec<Record>, identifier: &str) -> IndexMap<String, Vec<Record>> {
    let mut groups: IndexMap<String, Vec<Record>> = IndexMap::new();
    for record in records {
        if let Some(key) = record_key(&record, identifier) {
            groups.entry(key).or_default().push(record);
        }
    }
    groups
}

/// Records laid out in hierarchy interval order, so the records of any
/// subtree (the entity itself and all descendants) form one slice.
///
/// Records whose identifier is not a hierarchy entity belong to no entity.
/// Within one entity, records keep their source order.
pub struct SubtreeIndex {
    records: Vec<Record>,
    lefts: Vec<u32>,
}

impl SubtreeIndex {
    pub fn new(records: Vec<Record>, identifier: &str, hierarchy: &Hierarchy) -> Self {
        let mut placed: Vec<(u32, Record)> = records
            .into_iter()
            .filter_map(|record| {
                let left = record_key(&record, identifier)
                    .and_then(|id| hierarchy.get(&id))
                    .map(|entity| entity.left)?;
                Some((left, record))
            })
            .collect();
        placed.sort_by_key(|(left, _)| *left);

        let (lefts, records) = placed.into_iter().unzip();
        Self { records, lefts }
    }

    /// Records of `entity`'s subtree.
    pub fn records_of(&self, entity: &Entity) -> &[Record] {
        let start = self.lefts.partition_point(|&l| l < entity.left);
        let end = self.lefts.partition_point(|&l| l < entity.right);
        &self.records[start..end]
    }
}
