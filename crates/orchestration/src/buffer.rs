//! Pending field edits for one context, keyed by entity.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use testdeck_core::remote::ResultRecord;
use testdeck_core::types::DbId;

/// Field edits waiting to be written, merged per entity (last write wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingBuffer {
    entries: BTreeMap<DbId, Map<String, Value>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entities with pending edits.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, entity: DbId, field: &str) -> Option<&Value> {
        self.entries.get(&entity).and_then(|fields| fields.get(field))
    }

    /// Merge one field edit, replacing any earlier value of the same field.
    pub fn stage(&mut self, entity: DbId, field: impl Into<String>, value: Value) {
        self.entries
            .entry(entity)
            .or_default()
            .insert(field.into(), value);
    }

    /// Add a base record for `entity`. Fields that are already pending win.
    pub fn seed(&mut self, entity: DbId, fields: Map<String, Value>) {
        let pending = self.entries.entry(entity).or_default();
        for (field, value) in fields {
            pending.entry(field).or_insert(value);
        }
    }

    /// Merge a snapshot whose write failed back under the current edits.
    ///
    /// Values staged after the snapshot was taken are newer and win.
    pub fn restore_under(&mut self, snapshot: PendingBuffer) {
        for (entity, fields) in snapshot.entries {
            let pending = self.entries.entry(entity).or_default();
            for (field, value) in fields {
                pending.entry(field).or_insert(value);
            }
        }
    }

    /// One partial record per entity, in entity order.
    pub fn to_records(&self) -> Vec<ResultRecord> {
        self.entries
            .iter()
            .map(|(&case_id, fields)| ResultRecord {
                case_id,
                fields: fields.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stage_keeps_last_value() {
        let mut buffer = PendingBuffer::new();
        for n in 0..5 {
            buffer.stage(1, "remark", json!(format!("draft {n}")));
        }
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get(1, "remark"), Some(&json!("draft 4")));
    }

    #[test]
    fn seed_does_not_override_pending_fields() {
        let mut buffer = PendingBuffer::new();
        buffer.stage(1, "remark", json!("edited"));

        let mut base = Map::new();
        base.insert("remark".into(), json!("original"));
        base.insert("bug_id".into(), json!("BUG-7"));
        buffer.seed(1, base);

        assert_eq!(buffer.get(1, "remark"), Some(&json!("edited")));
        assert_eq!(buffer.get(1, "bug_id"), Some(&json!("BUG-7")));
    }

    #[test]
    fn restore_keeps_newer_edits() {
        let mut buffer = PendingBuffer::new();
        buffer.stage(1, "remark", json!("old"));
        buffer.stage(2, "bug_id", json!("B-1"));
        let snapshot = std::mem::take(&mut buffer);

        buffer.stage(1, "remark", json!("new"));
        buffer.restore_under(snapshot);

        assert_eq!(buffer.get(1, "remark"), Some(&json!("new")));
        assert_eq!(buffer.get(2, "bug_id"), Some(&json!("B-1")));
    }

    #[test]
    fn records_are_keyed_by_case_id() {
        let mut buffer = PendingBuffer::new();
        buffer.stage(7, "test_result", json!("OK"));
        buffer.stage(3, "remark", json!("r"));

        let records = buffer.to_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].case_id, 3);
        assert_eq!(records[1].get("test_result"), Some(&json!("OK")));
    }
}
