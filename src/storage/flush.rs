//! Writes buffered values back to storage before a dependent SELECT.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::config::EngineOptions;
use crate::error::{OrmError, Result};
use crate::query::emit::{quote, Statement};
use crate::query::value::Value;
use crate::schema::{FieldDescriptor, FieldKind, Registry};
use crate::storage::backend::Backend;
use crate::storage::cache::RecordCache;
use crate::storage::dirty::DirtyState;
use crate::types::{FieldKey, RecordId};

/// What a flush wrote.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Flushed fields in write order.
    pub fields: Vec<FieldKey>,
    /// Records written across all fields.
    pub records: usize,
}

impl FlushReport {
    /// True when nothing was written.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Borrows the pieces of a transaction a flush needs.
pub struct FlushCoordinator<'t, B: Backend + ?Sized> {
    registry: &'t Registry,
    backend: &'t mut B,
    cache: &'t RecordCache,
    dirty: &'t mut DirtyState,
    batch_size: usize,
}

impl<'t, B: Backend + ?Sized> FlushCoordinator<'t, B> {
    /// Coordinator over one transaction's state.
    pub fn new(registry: &'t Registry, backend: &'t mut B, cache: &'t RecordCache, dirty: &'t mut DirtyState) -> Self {
        Self {
            registry,
            backend,
            cache,
            dirty,
            batch_size: EngineOptions::default().batch_size,
        }
    }

    /// Caps the records written by one UPDATE.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Flushes the dirty members of `fields` in `(model, field)` order.
    /// Fields outside the set stay dirty.
    ///
    /// On failure the failing field stays dirty and every field written
    /// before it stays written.
    pub fn flush_for(&mut self, fields: &BTreeSet<FieldKey>) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        for key in fields {
            let Some(ids) = self.dirty.take(key) else {
                continue;
            };
            match self.flush_field(key, &ids) {
                Ok(written) => {
                    report.records += written;
                    report.fields.push(key.clone());
                }
                Err(err) => {
                    warn!(model = %key.model, field = %key.field, error = %err, "ormql.flush.failed");
                    self.dirty.mark(key.clone(), ids);
                    return Err(OrmError::Flush {
                        model: key.model.clone(),
                        field: key.field.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Flushes every dirty field.
    pub fn flush_all(&mut self) -> Result<FlushReport> {
        let all: BTreeSet<FieldKey> = self.dirty.dirty_fields().cloned().collect();
        self.flush_for(&all)
    }

    fn flush_field(&mut self, key: &FieldKey, ids: &BTreeSet<RecordId>) -> Result<usize> {
        let model = self.registry.model(&key.model)?;
        let field = self.registry.field(&key.model, &key.field)?;
        let written = match field.kind {
            FieldKind::Many2many => self.flush_links(field, ids)?,
            FieldKind::One2many => {
                return Err(OrmError::InvalidArgument(format!(
                    "one2many {key} is written through its inverse"
                )))
            }
            _ => {
                let ids: Vec<RecordId> = ids.iter().copied().collect();
                let mut written = 0;
                for chunk in ids.chunks(self.batch_size) {
                    if let Some(statement) = self.update_statement(&model.table, field, key, chunk) {
                        written += self.backend.execute(&statement)?;
                    }
                }
                written
            }
        };
        debug!(model = %key.model, field = %key.field, records = ids.len(), "ormql.flush.field");
        Ok(written)
    }

    /// `UPDATE t SET c = CASE id WHEN ? THEN ? ... END WHERE id IN (...)`.
    fn update_statement(
        &self,
        table: &str,
        field: &FieldDescriptor,
        key: &FieldKey,
        ids: &[RecordId],
    ) -> Option<Statement> {
        let rows: Vec<(RecordId, &Value)> = ids
            .iter()
            .filter_map(|id| self.cache.get(key, *id).map(|value| (*id, value)))
            .collect();
        if rows.is_empty() {
            return None;
        }
        let id = quote("id");
        let mut sql = format!("UPDATE {} SET {} = CASE {id}", quote(table), quote(&field.column));
        let mut params = Vec::with_capacity(rows.len() * 3);
        for (record, value) in &rows {
            sql.push_str(" WHEN ? THEN ?");
            params.push(Value::Int(*record));
            params.push((*value).clone());
        }
        let marks = vec!["?"; rows.len()].join(", ");
        sql.push_str(&format!(" END WHERE {id} IN ({marks})"));
        params.extend(rows.iter().map(|(record, _)| Value::Int(*record)));
        Some(Statement { sql, params })
    }

    /// Replaces the link rows of every record in `ids`.
    fn flush_links(&mut self, field: &FieldDescriptor, ids: &BTreeSet<RecordId>) -> Result<usize> {
        let link = field
            .link
            .as_ref()
            .ok_or_else(|| OrmError::Schema(format!("{}.{} has no link table", field.owner_model, field.name)))?;
        let key = field.key();
        let mut written = 0;
        for id in ids {
            let targets = match self.cache.get(&key, *id) {
                Some(Value::Ids(targets)) => targets.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(OrmError::InvalidArgument(format!(
                        "{key} expects a list of ids, got {}",
                        other.type_name()
                    )))
                }
            };
            self.backend.execute(&Statement {
                sql: format!("DELETE FROM {} WHERE {} = ?", quote(&link.table), quote(&link.column1)),
                params: vec![Value::Int(*id)],
            })?;
            let unique: BTreeSet<RecordId> = targets.into_iter().collect();
            for target in unique {
                self.backend.execute(&Statement {
                    sql: format!(
                        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                        quote(&link.table),
                        quote(&link.column1),
                        quote(&link.column2)
                    ),
                    params: vec![Value::Int(*id), Value::Int(target)],
                })?;
            }
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::sale_registry;
    use crate::storage::sqlite::SqliteBackend;

    struct Fixture {
        registry: Registry,
        backend: SqliteBackend,
        cache: RecordCache,
        dirty: DirtyState,
    }

    fn fixture() -> Fixture {
        let registry = sale_registry();
        let mut backend = SqliteBackend::open_in_memory(&EngineOptions::default()).expect("open");
        backend.create_schema(&registry).expect("schema");
        for name in ["S1", "S2"] {
            backend
                .insert("sale_order", &[("name".into(), Value::from(name))])
                .expect("insert");
        }
        backend.record_statements();
        Fixture {
            registry,
            backend,
            cache: RecordCache::new(),
            dirty: DirtyState::new(),
        }
    }

    fn write(fx: &mut Fixture, field: &str, id: RecordId, value: Value) {
        let key = FieldKey::new("sale.order", field);
        fx.cache.set(key.clone(), id, value);
        fx.dirty.mark(key, [id]);
    }

    #[test]
    fn one_batched_update_per_field() {
        let mut fx = fixture();
        write(&mut fx, "state", 1, Value::from("done"));
        write(&mut fx, "state", 2, Value::from("draft"));
        write(&mut fx, "amount", 1, Value::Float(4.5));
        let wanted: BTreeSet<FieldKey> = [FieldKey::new("sale.order", "state")].into_iter().collect();
        let report = FlushCoordinator::new(&fx.registry, &mut fx.backend, &fx.cache, &mut fx.dirty)
            .flush_for(&wanted)
            .expect("flush");
        assert_eq!(report.records, 2);
        let statements = fx.backend.take_statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            r#"UPDATE "sale_order" SET "state" = CASE "id" WHEN ? THEN ? WHEN ? THEN ? END WHERE "id" IN (?, ?)"#
        );
        assert!(fx.dirty.is_dirty(&FieldKey::new("sale.order", "amount")));
        assert!(!fx.dirty.is_dirty(&FieldKey::new("sale.order", "state")));
    }

    #[test]
    fn large_fields_are_written_in_batches() {
        let mut fx = fixture();
        write(&mut fx, "amount", 1, Value::Float(1.0));
        write(&mut fx, "amount", 2, Value::Float(2.0));
        let report = FlushCoordinator::new(&fx.registry, &mut fx.backend, &fx.cache, &mut fx.dirty)
            .with_batch_size(1)
            .flush_all()
            .expect("flush");
        assert_eq!(report.records, 2);
        assert_eq!(report.fields, vec![FieldKey::new("sale.order", "amount")]);
        let statements = fx.backend.take_statements();
        assert_eq!(statements.len(), 2);
        for (statement, id) in statements.iter().zip([1, 2]) {
            assert!(statement.sql.ends_with(r#"END WHERE "id" IN (?)"#));
            assert_eq!(statement.params[0], Value::Int(id));
        }
        assert!(fx.dirty.is_empty());
    }

    #[test]
    fn failed_field_stays_dirty() {
        let mut fx = fixture();
        write(&mut fx, "amount", 1, Value::Float(1.0));
        write(&mut fx, "name", 1, Value::Null);
        let err = FlushCoordinator::new(&fx.registry, &mut fx.backend, &fx.cache, &mut fx.dirty)
            .flush_all()
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(matches!(&err, OrmError::Flush { field, .. } if field == "name"));
        assert!(fx.dirty.is_dirty(&FieldKey::new("sale.order", "name")));
        assert!(!fx.dirty.is_dirty(&FieldKey::new("sale.order", "amount")));
    }

    #[test]
    fn many2many_replaces_links() {
        let mut fx = fixture();
        let tag = fx.backend.insert("sale_tag", &[("name".into(), Value::from("t"))]).expect("tag");
        write(&mut fx, "tag_ids", 1, Value::Ids(vec![tag, tag]));
        FlushCoordinator::new(&fx.registry, &mut fx.backend, &fx.cache, &mut fx.dirty)
            .flush_all()
            .expect("flush");
        let links: i64 = fx
            .backend
            .connection()
            .query_row(r#"SELECT COUNT(*) FROM "sale_order_sale_tag_rel""#, [], |row| row.get(0))
            .expect("count");
        assert_eq!(links, 1);
    }
}
