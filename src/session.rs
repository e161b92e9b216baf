//! Engine handle and per-transaction state.
//!
//! A [`Transaction`] owns its backend connection, the record cache and the
//! dirty state. Every search runs compile → flush → emit → execute.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace};

use crate::config::EngineOptions;
use crate::error::{OrmError, Result};
use crate::query::ast::Domain;
use crate::query::compiler::{CompiledQuery, Compiler};
use crate::query::emit::{quote, Statement};
use crate::query::normalize::normalize_with;
use crate::query::value::Value;
use crate::schema::{FieldDescriptor, FieldKind, Registry, ValueType};
use crate::security::AccessContext;
use crate::storage::{Backend, DirtyState, FlushCoordinator, FlushReport, RecordCache, Row};
use crate::types::{FieldKey, RecordId};

/// Ordering and paging of a search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Order spec; the model's default order when unset.
    pub order: Option<String>,
    /// LIMIT.
    pub limit: Option<u64>,
    /// OFFSET.
    pub offset: Option<u64>,
}

impl SearchOptions {
    /// Sets the order spec.
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Sets the limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Shared, read-only engine state.
#[derive(Clone, Debug)]
pub struct Engine {
    registry: Arc<Registry>,
    options: EngineOptions,
}

impl Engine {
    /// Engine over a registry.
    pub fn new(registry: impl Into<Arc<Registry>>, options: EngineOptions) -> Self {
        Self {
            registry: registry.into(),
            options,
        }
    }

    /// Model registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Engine options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Compiles a search without touching storage.
    pub fn compile(
        &self,
        access: &AccessContext,
        model: &str,
        domain: &Domain,
        search: &SearchOptions,
        lang: Option<&str>,
    ) -> Result<CompiledQuery> {
        compile_search(&self.registry, &self.options, access, lang, model, domain, search)
    }

    /// Opens a transaction on `backend` acting as `access`.
    pub fn begin<B: Backend>(&self, mut backend: B, access: AccessContext) -> Result<Transaction<B>> {
        backend.begin()?;
        trace!(uid = access.principal().uid, "ormql.transaction.begin");
        Ok(Transaction {
            registry: self.registry.clone(),
            options: self.options.clone(),
            access,
            backend,
            lang: self.options.default_lang.clone(),
            cache: RecordCache::new(),
            dirty: DirtyState::new(),
        })
    }
}

fn compile_search(
    registry: &Registry,
    options: &EngineOptions,
    access: &AccessContext,
    lang: Option<&str>,
    model: &str,
    domain: &Domain,
    search: &SearchOptions,
) -> Result<CompiledQuery> {
    let node = normalize_with(registry, model, domain, &options.limits())?;
    let compiled = Compiler::new(registry, access, options).with_lang(lang).compile_search(
        model,
        &node,
        search.order.as_deref(),
        search.limit,
        search.offset,
    )?;
    Ok(compiled)
}

/// One unit of work.
pub struct Transaction<B: Backend> {
    registry: Arc<Registry>,
    options: EngineOptions,
    access: AccessContext,
    backend: B,
    lang: Option<String>,
    cache: RecordCache,
    dirty: DirtyState,
}

impl<B: Backend> Transaction<B> {
    /// Language of translatable fields for the rest of the transaction.
    pub fn set_lang(&mut self, lang: Option<&str>) {
        self.lang = lang.map(str::to_owned).or_else(|| self.options.default_lang.clone());
    }

    /// Acting principal and rules.
    pub fn access(&self) -> &AccessContext {
        &self.access
    }

    /// Pending writes.
    pub fn dirty(&self) -> &DirtyState {
        &self.dirty
    }

    /// Backend connection.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend connection.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Compiles a search with the transaction's principal and language.
    pub fn compile(&self, model: &str, domain: &Domain, search: &SearchOptions) -> Result<CompiledQuery> {
        compile_search(
            &self.registry,
            &self.options,
            &self.access,
            self.lang.as_deref(),
            model,
            domain,
            search,
        )
    }

    /// Ids of `model` matching `domain` in the model's default order.
    pub fn search(&mut self, model: &str, domain: &Domain) -> Result<Vec<RecordId>> {
        self.search_with(model, domain, &SearchOptions::default())
    }

    /// Ids of `model` matching `domain`, without duplicates, in query order.
    pub fn search_with(&mut self, model: &str, domain: &Domain, search: &SearchOptions) -> Result<Vec<RecordId>> {
        let compiled = self.compile(model, domain, search)?;
        let report = self.flush_fields(&compiled.to_flush)?;
        let statement = compiled.statement();
        let ids = self.backend.query_ids(&statement)?;
        let mut seen = FxHashSet::default();
        let ids: Vec<RecordId> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        debug!(
            model = %model,
            rows = ids.len(),
            flushed = report.fields.len(),
            fingerprint = statement.fingerprint(),
            "ormql.search"
        );
        Ok(ids)
    }

    /// Grouped aggregation. Rows are keyed by the group-by field names, the
    /// aggregate specs (`amount:sum`) and `__count`.
    pub fn read_group(
        &mut self,
        model: &str,
        domain: &Domain,
        groupby: &[&str],
        aggregates: &[&str],
        order: Option<&str>,
    ) -> Result<Vec<Row>> {
        let node = normalize_with(&self.registry, model, domain, &self.options.limits())?;
        let groupby: Vec<String> = groupby.iter().map(|s| (*s).to_owned()).collect();
        let aggregates: Vec<String> = aggregates.iter().map(|s| (*s).to_owned()).collect();
        let compiled = Compiler::new(&self.registry, &self.access, &self.options)
            .with_lang(self.lang.as_deref())
            .compile_read_group(model, &node, &groupby, &aggregates, order)?;
        self.flush_fields(&compiled.to_flush)?;
        let rows = self.backend.query_rows(&compiled.statement())?;
        debug!(model = %model, groups = rows.len(), "ormql.read_group");
        Ok(rows)
    }

    /// Values of `fields` for `ids`, in `ids` order. Buffered writes win over
    /// stored values; x2many fields come back as [`Value::Ids`].
    pub fn read(&mut self, model: &str, ids: &[RecordId], fields: &[&str]) -> Result<Vec<Row>> {
        let model_def = self.registry.model(model)?.clone();
        let mut columns = Vec::new();
        let mut relations = Vec::new();
        for name in fields {
            let field = self.registry.field(model, name)?.clone();
            self.access.check_field(&field)?;
            match field.kind {
                FieldKind::One2many | FieldKind::Many2many => relations.push(field),
                _ if field.stored => columns.push(field),
                _ => {
                    return Err(OrmError::InvalidArgument(format!(
                        "{model}.{name} is not stored and cannot be read"
                    )))
                }
            }
        }
        let flush: BTreeSet<FieldKey> = relations.iter().filter_map(|f| relation_key(f)).collect();
        self.flush_fields(&flush)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut select = vec![quote("id")];
        select.extend(
            columns
                .iter()
                .filter(|f| f.name != "id")
                .map(|f| format!("{} AS {}", quote(&f.column), quote(&f.name))),
        );
        let mut by_id: FxHashMap<RecordId, Row> = FxHashMap::default();
        for chunk in ids.chunks(self.batch_size()) {
            let statement = Statement {
                sql: format!(
                    "SELECT {} FROM {} WHERE {} IN ({})",
                    select.join(", "),
                    quote(&model_def.table),
                    quote("id"),
                    placeholders(chunk.len())
                ),
                params: chunk.iter().map(|id| Value::Int(*id)).collect(),
            };
            for row in self.backend.query_rows(&statement)? {
                if let Some(id) = row.get("id").and_then(Value::as_int) {
                    by_id.insert(id, row);
                }
            }
        }

        for field in &columns {
            let key = field.key();
            for (id, row) in by_id.iter_mut() {
                let value = match self.cache.get(&key, *id) {
                    Some(value) if self.dirty.is_record_dirty(&key, *id) => value.clone(),
                    _ => row.remove(&field.name).unwrap_or(Value::Null),
                };
                row.insert(field.name.clone(), decode(field, value));
            }
        }
        for field in &relations {
            let related = self.related_ids(field, ids)?;
            for (id, row) in by_id.iter_mut() {
                let targets = related.get(id).cloned().unwrap_or_default();
                row.insert(field.name.clone(), Value::Ids(targets));
            }
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Buffers `values` for every record in `ids`; nothing reaches storage
    /// until a flush needs it.
    pub fn write(&mut self, model: &str, ids: &[RecordId], values: &[(&str, Value)]) -> Result<()> {
        let mut keys = Vec::with_capacity(values.len());
        for (name, value) in values {
            let field = self.registry.field(model, name)?;
            self.access.check_field(field)?;
            check_writable(field, value)?;
            keys.push((field.key(), value));
        }
        for (key, value) in keys {
            for id in ids {
                self.cache.set(key.clone(), *id, value.clone());
            }
            self.dirty.mark(key, ids.iter().copied());
        }
        trace!(model = %model, records = ids.len(), fields = values.len(), "ormql.write");
        Ok(())
    }

    /// Inserts a record right away and returns its id. Many2many values are
    /// buffered like writes.
    pub fn create(&mut self, model: &str, values: &[(&str, Value)]) -> Result<RecordId> {
        let table = self.registry.model(model)?.table.clone();
        let mut columns = Vec::new();
        let mut links = Vec::new();
        for (name, value) in values {
            let field = self.registry.field(model, name)?;
            self.access.check_field(field)?;
            check_writable(field, value)?;
            if field.kind == FieldKind::Many2many {
                links.push((field.key(), value.clone()));
            } else {
                columns.push((field.column.clone(), value.clone()));
            }
        }
        let id = self.backend.insert(&table, &columns)?;
        for (key, value) in links {
            self.cache.set(key.clone(), id, value);
            self.dirty.mark(key, [id]);
        }
        debug!(model = %model, id, "ormql.create");
        Ok(id)
    }

    /// Flushes the dirty members of `fields`.
    pub fn flush_fields(&mut self, fields: &BTreeSet<FieldKey>) -> Result<FlushReport> {
        FlushCoordinator::new(&self.registry, &mut self.backend, &self.cache, &mut self.dirty)
            .with_batch_size(self.options.batch_size)
            .flush_for(fields)
    }

    /// Flushes every pending write.
    pub fn flush_all(&mut self) -> Result<FlushReport> {
        FlushCoordinator::new(&self.registry, &mut self.backend, &self.cache, &mut self.dirty)
            .with_batch_size(self.options.batch_size)
            .flush_all()
    }

    /// Flushes everything, commits and hands the backend back.
    pub fn commit(mut self) -> Result<B> {
        let report = self.flush_all()?;
        self.backend.commit()?;
        info!(flushed = report.fields.len(), records = report.records, "ormql.transaction.commit");
        Ok(self.backend)
    }

    /// Drops buffered writes, rolls back and hands the backend back.
    pub fn rollback(mut self) -> Result<B> {
        self.cache.clear();
        self.dirty.clear();
        self.backend.rollback()?;
        info!("ormql.transaction.rollback");
        Ok(self.backend)
    }

    fn related_ids(&mut self, field: &FieldDescriptor, ids: &[RecordId]) -> Result<FxHashMap<RecordId, Vec<RecordId>>> {
        let (table, owner, target) = match field.kind {
            FieldKind::Many2many => {
                let link = field
                    .link
                    .as_ref()
                    .ok_or_else(|| OrmError::Schema(format!("{}.{} has no link table", field.owner_model, field.name)))?;
                (link.table.clone(), link.column1.clone(), link.column2.clone())
            }
            _ => {
                let target = self.registry.model(field.target())?;
                let inverse = field.inverse_name.as_deref().unwrap_or_default();
                let inverse = self.registry.field(&target.name, inverse)?;
                (target.table.clone(), inverse.column.clone(), "id".to_owned())
            }
        };
        let mut out: FxHashMap<RecordId, Vec<RecordId>> = FxHashMap::default();
        for chunk in ids.chunks(self.batch_size()) {
            let statement = Statement {
                sql: format!(
                    "SELECT {owner} AS \"owner\", {target} AS \"target\" FROM {table} WHERE {owner} IN ({marks}) ORDER BY {target}",
                    owner = quote(&owner),
                    target = quote(&target),
                    table = quote(&table),
                    marks = placeholders(chunk.len()),
                ),
                params: chunk.iter().map(|id| Value::Int(*id)).collect(),
            };
            for row in self.backend.query_rows(&statement)? {
                if let (Some(owner), Some(target)) = (
                    row.get("owner").and_then(Value::as_int),
                    row.get("target").and_then(Value::as_int),
                ) {
                    out.entry(owner).or_default().push(target);
                }
            }
        }
        Ok(out)
    }

    fn batch_size(&self) -> usize {
        self.options.batch_size.max(1)
    }
}

fn check_writable(field: &FieldDescriptor, value: &Value) -> Result<()> {
    if field.name == "id" || !field.stored || field.kind == FieldKind::One2many {
        return Err(OrmError::InvalidArgument(format!(
            "{}.{} is not writable",
            field.owner_model, field.name
        )));
    }
    if field.kind == FieldKind::Many2many && !matches!(value, Value::Ids(_) | Value::Null) {
        return Err(OrmError::InvalidArgument(format!(
            "{}.{} expects a list of ids, got {}",
            field.owner_model,
            field.name,
            value.type_name()
        )));
    }
    Ok(())
}

/// Dirty key that must be flushed before reading an x2many.
fn relation_key(field: &FieldDescriptor) -> Option<FieldKey> {
    match field.kind {
        FieldKind::One2many => field
            .inverse_name
            .as_ref()
            .map(|inverse| FieldKey::new(field.target(), inverse.clone())),
        FieldKind::Many2many => Some(field.key()),
        _ => None,
    }
}

/// SQLite hands booleans back as integers.
fn decode(field: &FieldDescriptor, value: Value) -> Value {
    match (field.value_type, value) {
        (ValueType::Boolean, Value::Int(i)) => Value::Bool(i != 0),
        (_, value) => value,
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
