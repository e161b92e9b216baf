use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::query::value::Value;
use crate::types::{FieldKey, RecordId};

/// Values written in the current transaction, keyed by field then record.
#[derive(Clone, Debug, Default)]
pub struct RecordCache {
    values: FxHashMap<FieldKey, BTreeMap<RecordId, Value>>,
}

impl RecordCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the value of `key` for record `id`.
    pub fn set(&mut self, key: FieldKey, id: RecordId, value: Value) {
        self.values.entry(key).or_default().insert(id, value);
    }

    /// Cached value, if any.
    pub fn get(&self, key: &FieldKey, id: RecordId) -> Option<&Value> {
        self.values.get(key).and_then(|by_id| by_id.get(&id))
    }

    /// Forgets every cached value.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
