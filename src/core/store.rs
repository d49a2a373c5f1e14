// In-memory, insertion-ordered store of decoded requests with sequential ids.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One intercepted request, decoded or not. Never mutated once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedRequest {
    pub id: u64,
    pub timestamp: String,
    pub formatted: String,
    pub raw: Value,
}

#[derive(Debug, Default)]
pub struct RequestStore {
    entries: Vec<DecodedRequest>,
    by_id: HashMap<u64, usize>,
    last_id: u64,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next id and appends. Ids start at 1 and never repeat until `clear`.
    pub fn append(
        &mut self,
        timestamp: impl Into<String>,
        formatted: impl Into<String>,
        raw: Value,
    ) -> &DecodedRequest {
        self.last_id += 1;
        let entry = DecodedRequest {
            id: self.last_id,
            timestamp: timestamp.into(),
            formatted: formatted.into(),
            raw,
        };
        self.by_id.insert(entry.id, self.entries.len());
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn get(&self, id: u64) -> Option<&DecodedRequest> {
        self.by_id.get(&id).map(|&index| &self.entries[index])
    }

    pub fn list(&self) -> &[DecodedRequest] {
        &self.entries
    }

    pub fn last(&self) -> Option<&DecodedRequest> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
        self.last_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::RequestStore;
    use serde_json::json;

    #[test]
    fn append_assigns_sequential_ids_from_one() {
        let mut store = RequestStore::new();
        for expected in 1..=5 {
            let entry = store.append("12:00:00", "{}", json!({}));
            assert_eq!(entry.id, expected);
        }
        let ids: Vec<u64> = store.list().iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn get_finds_entries_by_id() {
        let mut store = RequestStore::new();
        store.append("12:00:00", "first", json!({"n": 1}));
        store.append("12:00:01", "second", json!({"n": 2}));

        assert_eq!(store.get(2).map(|entry| entry.formatted.as_str()), Some("second"));
        assert_eq!(store.get(1).map(|entry| &entry.raw), Some(&json!({"n": 1})));
        assert!(store.get(0).is_none());
        assert!(store.get(3).is_none());
    }

    #[test]
    fn clear_resets_numbering() {
        let mut store = RequestStore::new();
        store.append("12:00:00", "a", json!(1));
        store.append("12:00:01", "b", json!(2));
        store.clear();

        assert!(store.is_empty());
        assert!(store.list().is_empty());
        assert!(store.get(1).is_none());

        let entry = store.append("12:00:02", "c", json!(3));
        assert_eq!(entry.id, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn entries_serialize_with_wire_field_names() {
        let mut store = RequestStore::new();
        let entry = store.append("09:15:00", "{}", json!({"a": 1})).clone();
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(
            value,
            json!({"id": 1, "timestamp": "09:15:00", "formatted": "{}", "raw": {"a": 1}})
        );
    }
}
