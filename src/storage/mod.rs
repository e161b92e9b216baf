//! Write buffering and SQL execution.
//!
//! Writes made through a transaction land in the [`RecordCache`] and mark
//! the [`DirtyState`]; the [`FlushCoordinator`] turns them into batched
//! UPDATEs right before a SELECT that reads them.

/// Driver abstraction.
pub mod backend;

/// Buffered field values.
pub mod cache;

/// Pending-write bookkeeping.
pub mod dirty;

/// Dirty field → UPDATE statements.
pub mod flush;

/// SQLite driver.
pub mod sqlite;

pub use backend::{Backend, Row};
pub use cache::RecordCache;
pub use dirty::DirtyState;
pub use flush::{FlushCoordinator, FlushReport};
pub use sqlite::SqliteBackend;
