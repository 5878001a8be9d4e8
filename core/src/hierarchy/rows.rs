//! Hierarchy input rows and their extraction from source records.

use serde_json::Value;

use crate::config::HierarchySpec;
use crate::error::{HierarchyError, HierarchyResult};
use crate::models::{value_key, Record};

/// One parent-linked input row.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub rank: String,
    pub label: String,
    /// Explicit sibling position, sorted before rank and label
    pub order_key: Option<i64>,
    pub attributes: Record,
}

impl HierarchyRow {
    /// A row labelled with its own id.
    pub fn new(id: &str, parent_id: Option<&str>, rank: &str) -> Self {
        Self {
            id: id.to_string(),
            parent_id: parent_id.map(String::from),
            rank: rank.to_string(),
            label: id.to_string(),
            order_key: None,
            attributes: Record::new(),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_order(mut self, order_key: Option<i64>) -> Self {
        self.order_key = order_key;
        self
    }
}

/// Map source records to hierarchy rows using the field names of `spec`.
///
/// A null, empty or missing parent makes the row a root. Every field of the
/// record is kept in `attributes`.
pub fn rows_from_records(records: &[Record], spec: &HierarchySpec) -> HierarchyResult<Vec<HierarchyRow>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let id = record
                .get(&spec.id_field)
                .and_then(value_key)
                .ok_or_else(|| HierarchyError::InvalidRow {
                    index,
                    message: format!("missing id field '{}'", spec.id_field),
                })?;

            let parent_id = record.get(&spec.parent_field).and_then(value_key);

            let rank = match record.get(&spec.rank_field) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => value_key(other).unwrap_or_default(),
                None => String::new(),
            };

            let label = record
                .get(&spec.label_field)
                .and_then(value_key)
                .unwrap_or_else(|| id.clone());

            let order_key = match &spec.order_field {
                Some(field) => match record.get(field) {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(value.as_i64().ok_or_else(|| HierarchyError::InvalidRow {
                        index,
                        message: format!("order field '{}' is not an integer", field),
                    })?),
                },
                None => None,
            };

            Ok(HierarchyRow {
                id,
                parent_id,
                rank,
                label,
                order_key,
                attributes: record.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceRef;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_rows_from_records_maps_fields() {
        let mut spec = HierarchySpec::with_source(SourceRef::Named("taxonomy".into()));
        spec.label_field = "full_name".into();
        spec.order_field = Some("position".into());

        let rows = rows_from_records(
            &[
                record(json!({ "id": 1, "parent_id": null, "rank": "family", "full_name": "Myrtaceae" })),
                record(json!({ "id": 2, "parent_id": 1, "rank": "genus", "position": 3 })),
            ],
            &spec,
        )
        .unwrap();

        assert_eq!(rows[0].id, "1");
        assert_eq!(rows[0].parent_id, None);
        assert_eq!(rows[0].label, "Myrtaceae");
        assert_eq!(rows[1].parent_id.as_deref(), Some("1"));
        assert_eq!(rows[1].label, "2");
        assert_eq!(rows[1].order_key, Some(3));
        assert_eq!(rows[1].attributes["position"], json!(3));
    }

    #[test]
    fn test_missing_id_is_reported_with_index() {
        let spec = HierarchySpec::with_source(SourceRef::Named("t".into()));
        let err = rows_from_records(
            &[record(json!({ "id": 1 })), record(json!({ "name": "x" }))],
            &spec,
        )
        .unwrap_err();
        assert!(matches!(err, HierarchyError::InvalidRow { index: 1, .. }));
    }
}
