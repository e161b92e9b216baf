//! Identifiers shared by the compiler, the security layer and the write buffer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary key of a stored record.
pub type RecordId = i64;

/// `(model, field)` pair used to key dirty sets and flush requirements.
///
/// Ordering is lexicographic on `(model, field)`; flushes run in this order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    /// Technical model name (`sale.order`).
    pub model: String,
    /// Field name on that model.
    pub field: String,
}

impl FieldKey {
    /// Builds a key from borrowed names.
    pub fn new(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model, self.field)
    }
}
