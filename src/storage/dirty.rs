use std::collections::{BTreeMap, BTreeSet};

use crate::types::{FieldKey, RecordId};

/// Records with buffered, not yet flushed values, per `(model, field)`.
///
/// Owned by one transaction. Iteration follows the `(model, field)` order,
/// which is also the flush order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtyState {
    fields: BTreeMap<FieldKey, BTreeSet<RecordId>>,
}

impl DirtyState {
    /// Nothing dirty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `ids` dirty for `key`.
    pub fn mark<I>(&mut self, key: FieldKey, ids: I)
    where
        I: IntoIterator<Item = RecordId>,
    {
        let set = self.fields.entry(key).or_default();
        set.extend(ids);
        if set.is_empty() {
            self.fields.retain(|_, ids| !ids.is_empty());
        }
    }

    /// Whether `key` has pending writes.
    pub fn is_dirty(&self, key: &FieldKey) -> bool {
        self.fields.contains_key(key)
    }

    /// Whether record `id` has a pending write on `key`.
    pub fn is_record_dirty(&self, key: &FieldKey, id: RecordId) -> bool {
        self.fields.get(key).is_some_and(|ids| ids.contains(&id))
    }

    /// Pending ids of `key`.
    pub fn ids(&self, key: &FieldKey) -> Option<&BTreeSet<RecordId>> {
        self.fields.get(key)
    }

    /// Removes and returns the pending ids of `key`.
    pub fn take(&mut self, key: &FieldKey) -> Option<BTreeSet<RecordId>> {
        self.fields.remove(key)
    }

    /// Dirty keys in flush order.
    pub fn dirty_fields(&self) -> impl Iterator<Item = &FieldKey> {
        self.fields.keys()
    }

    /// Number of dirty keys.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Forgets every pending write.
    pub fn clear(&mut self) {
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_take_and_order() {
        let mut dirty = DirtyState::new();
        dirty.mark(FieldKey::new("sale.order", "state"), [3, 1]);
        dirty.mark(FieldKey::new("res.partner", "name"), [7]);
        dirty.mark(FieldKey::new("sale.order", "state"), [1, 2]);
        let keys: Vec<String> = dirty.dirty_fields().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["res.partner.name", "sale.order.state"]);

        let state = FieldKey::new("sale.order", "state");
        assert!(dirty.is_record_dirty(&state, 2));
        let ids: Vec<RecordId> = dirty.take(&state).expect("dirty").into_iter().collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(!dirty.is_dirty(&state));
        assert_eq!(dirty.len(), 1);
    }

    #[test]
    fn marking_nothing_leaves_no_entry() {
        let mut dirty = DirtyState::new();
        dirty.mark(FieldKey::new("a", "b"), []);
        assert!(dirty.is_empty());
    }
}
