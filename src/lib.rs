//! Domain-to-SQL compiler for a model-driven ORM.
//!
//! Declarative filter trees ("domains") over a registry of models are
//! normalized, compiled with row-level security and emitted as parameterized
//! SQL. Buffered writes a statement depends on are flushed right before it
//! runs.
//!
//! ```no_run
//! use ormql::{AccessContext, Domain, Engine, EngineOptions, Registry, SqliteBackend};
//!
//! # fn main() -> ormql::Result<()> {
//! let registry = Registry::load("schema.toml".as_ref())?;
//! let engine = Engine::new(registry, EngineOptions::default());
//! let mut backend = SqliteBackend::open_in_memory(engine.options())?;
//! backend.create_schema(engine.registry())?;
//! let mut tx = engine.begin(backend, AccessContext::superuser())?;
//! let ids = tx.search("res.partner", &Domain::parse(r#"[["name", "ilike", "jack"]]"#)?)?;
//! # let _ = ids;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod query;
pub mod schema;
pub mod security;
pub mod session;
pub mod storage;
pub mod types;

pub use config::EngineOptions;
pub use error::{OrmError, Result};
pub use query::{CompiledQuery, Domain, DomainError, DomainNode, Operator, Statement, Value};
pub use schema::{FieldDescriptor, ModelBuilder, Registry};
pub use security::{AccessContext, Principal, RowRule, RuleSet};
pub use session::{Engine, SearchOptions, Transaction};
pub use storage::{Backend, SqliteBackend};
pub use types::{FieldKey, RecordId};
