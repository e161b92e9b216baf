//! [`Backend`] over a `rusqlite` connection.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use tracing::{debug, trace};

use crate::config::EngineOptions;
use crate::error::Result;
use crate::query::emit::{quote, Statement};
use crate::query::value::Value;
use crate::schema::{FieldKind, Registry};
use crate::storage::backend::{Backend, Row};
use crate::types::RecordId;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(Sql::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
            Value::Ids(ids) => ToSqlOutput::Owned(Sql::Text(serde_json::Value::from(ids.clone()).to_string())),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        })
    }
}

/// SQLite storage.
pub struct SqliteBackend {
    conn: Connection,
    log: Option<Vec<Statement>>,
}

impl SqliteBackend {
    /// Opens (or creates) a database file.
    pub fn open(path: &Path, options: &EngineOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, options)
    }

    /// Private in-memory database.
    pub fn open_in_memory(options: &EngineOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, options)
    }

    /// Wraps an existing connection and applies the engine pragmas.
    pub fn from_connection(conn: Connection, options: &EngineOptions) -> Result<Self> {
        conn.pragma_update(None, "case_sensitive_like", options.case_sensitive_like)?;
        conn.pragma_update(None, "foreign_keys", options.foreign_keys)?;
        Ok(Self { conn, log: None })
    }

    /// Starts recording every statement sent through the [`Backend`] methods.
    pub fn record_statements(&mut self) {
        self.log.get_or_insert_with(Vec::new);
    }

    /// Recorded statements, oldest first.
    pub fn statements(&self) -> &[Statement] {
        self.log.as_deref().unwrap_or(&[])
    }

    /// Drains the recorded statements.
    pub fn take_statements(&mut self) -> Vec<Statement> {
        self.log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Creates the tables of every model plus the many2many link tables.
    pub fn create_schema(&mut self, registry: &Registry) -> Result<()> {
        let mut links = BTreeSet::new();
        for model in registry.models() {
            let mut columns = vec![format!("{} INTEGER PRIMARY KEY", quote("id"))];
            for field in model.column_fields() {
                let mut column = format!("{} {}", quote(&field.column), field.value_type.sql_type());
                if field.required {
                    column.push_str(" NOT NULL");
                }
                if field.kind == FieldKind::Many2one {
                    let target = registry.model(field.target())?;
                    column.push_str(&format!(" REFERENCES {}({})", quote(&target.table), quote("id")));
                }
                columns.push(column);
            }
            let ddl = format!("CREATE TABLE IF NOT EXISTS {} ({})", quote(&model.table), columns.join(", "));
            trace!(sql = %ddl, "ormql.sqlite.ddl");
            self.conn.execute(&ddl, [])?;

            for field in model.fields().filter(|f| f.kind == FieldKind::Many2many) {
                let Some(link) = &field.link else { continue };
                if !links.insert(link.table.clone()) {
                    continue;
                }
                let target = registry.model(field.target())?;
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {table} ({c1} INTEGER NOT NULL REFERENCES {t1}({id}) ON DELETE CASCADE, \
                     {c2} INTEGER NOT NULL REFERENCES {t2}({id}) ON DELETE CASCADE, PRIMARY KEY ({c1}, {c2}))",
                    table = quote(&link.table),
                    c1 = quote(&link.column1),
                    c2 = quote(&link.column2),
                    t1 = quote(&model.table),
                    t2 = quote(&target.table),
                    id = quote("id"),
                );
                trace!(sql = %ddl, "ormql.sqlite.ddl");
                self.conn.execute(&ddl, [])?;
            }
        }
        debug!(models = registry.models().count(), links = links.len(), "ormql.sqlite.schema_created");
        Ok(())
    }

    fn record(&mut self, statement: &Statement) {
        if let Some(log) = &mut self.log {
            log.push(statement.clone());
        }
    }
}

impl Backend for SqliteBackend {
    fn execute(&mut self, statement: &Statement) -> Result<usize> {
        self.record(statement);
        let mut stmt = self.conn.prepare_cached(&statement.sql)?;
        Ok(stmt.execute(params_from_iter(statement.params.iter()))?)
    }

    fn query_ids(&mut self, statement: &Statement) -> Result<Vec<RecordId>> {
        self.record(statement);
        let mut stmt = self.conn.prepare_cached(&statement.sql)?;
        let rows = stmt.query_map(params_from_iter(statement.params.iter()), |row| row.get::<_, RecordId>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    fn query_rows(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        self.record(statement);
        let mut stmt = self.conn.prepare_cached(&statement.sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
        let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), row.get::<_, Value>(i)?);
            }
            out.push(record);
        }
        Ok(out)
    }

    fn insert(&mut self, table: &str, values: &[(String, Value)]) -> Result<RecordId> {
        let statement = if values.is_empty() {
            Statement::new(format!("INSERT INTO {} DEFAULT VALUES", quote(table)))
        } else {
            let columns: Vec<String> = values.iter().map(|(c, _)| quote(c)).collect();
            let marks = vec!["?"; values.len()].join(", ");
            Statement {
                sql: format!("INSERT INTO {} ({}) VALUES ({marks})", quote(table), columns.join(", ")),
                params: values.iter().map(|(_, v)| v.clone()).collect(),
            }
        };
        self.execute(&statement)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}
