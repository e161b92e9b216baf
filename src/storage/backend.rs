use std::collections::BTreeMap;

use crate::error::Result;
use crate::query::emit::Statement;
use crate::query::value::Value;
use crate::types::RecordId;

/// One result row keyed by output column name.
pub type Row = BTreeMap<String, Value>;

/// Synchronous SQL driver used by a transaction.
pub trait Backend {
    /// Runs a statement that returns no rows; yields the affected row count.
    fn execute(&mut self, statement: &Statement) -> Result<usize>;

    /// Runs a query whose first column is a record id.
    fn query_ids(&mut self, statement: &Statement) -> Result<Vec<RecordId>>;

    /// Runs a query and returns every column of every row.
    fn query_rows(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    /// Inserts one row into `table` and returns its id.
    fn insert(&mut self, table: &str, values: &[(String, Value)]) -> Result<RecordId>;

    /// Opens a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> Result<()>;
}
