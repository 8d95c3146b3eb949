use std::rc::Rc;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};

use mptree_core::config::quote_ident;
use mptree_core::{Backend, Dialect, Error, Result, Row, TreeOptions, Value};

const STATEMENT_CACHE_CAPACITY: usize = 64;

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Statement handle: validated SQL text. The compiled statement lives in rusqlite's
/// per-connection cache and is looked up by this text on every execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqliteStatement {
    sql: Rc<str>,
}

impl SqliteStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// `Backend` over one rusqlite connection.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn new(conn: Connection) -> Self {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Self { conn }
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self::new(conn))
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Ok(Self::new(conn))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(storage_err)
    }

    /// Create the tree table if missing: integer id, unique path, plus `extra_columns`.
    pub fn create_table(&self, options: &TreeOptions, extra_columns: &[&str]) -> Result<()> {
        let mut columns = vec![
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(&options.id_column)),
            format!("{} TEXT NOT NULL UNIQUE", quote_ident(&options.path_column)),
        ];
        columns.extend(extra_columns.iter().map(|c| c.to_string()));
        self.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&options.table),
            columns.join(", ")
        ))
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|e| Error::Storage(format!("non UTF-8 text column: {e}")))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

impl Backend for SqliteBackend {
    type Statement = SqliteStatement;

    fn dialect(&self) -> Dialect {
        Dialect::SQLITE
    }

    fn prepare(&mut self, sql: &str) -> Result<SqliteStatement> {
        self.conn.prepare_cached(sql).map_err(storage_err)?;
        Ok(SqliteStatement { sql: sql.into() })
    }

    fn execute(&mut self, stmt: &SqliteStatement, params: &[Value]) -> Result<u64> {
        let mut cached = self.conn.prepare_cached(&stmt.sql).map_err(storage_err)?;
        let changed = cached
            .execute(params_from_iter(params.iter().map(to_sql_value)))
            .map_err(storage_err)?;
        Ok(changed as u64)
    }

    fn query(&mut self, stmt: &SqliteStatement, params: &[Value]) -> Result<Vec<Row>> {
        let mut cached = self.conn.prepare_cached(&stmt.sql).map_err(storage_err)?;
        let names: Vec<String> = cached.column_names().into_iter().map(String::from).collect();
        let mut rows = cached
            .query(params_from_iter(params.iter().map(to_sql_value)))
            .map_err(storage_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage_err)? {
            let mut columns = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(storage_err)?;
                columns.push((name.clone(), from_value_ref(value)?));
            }
            out.push(Row::new(columns));
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(storage_err)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(storage_err)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_returns_named_columns() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch("CREATE TABLE t (a INTEGER, b TEXT, c BLOB, d REAL)")
            .unwrap();
        let insert = backend.prepare("INSERT INTO t VALUES (?1, ?2, ?3, ?4)").unwrap();
        let changed = backend
            .execute(
                &insert,
                &[
                    Value::Integer(1),
                    Value::from("x"),
                    Value::Blob(vec![1, 2]),
                    Value::Null,
                ],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let select = backend.prepare("SELECT * FROM t").unwrap();
        let rows = backend.query(&select, &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("a"), Some(&Value::Integer(1)));
        assert_eq!(rows[0].get("b"), Some(&Value::from("x")));
        assert_eq!(rows[0].get("c"), Some(&Value::Blob(vec![1, 2])));
        assert_eq!(rows[0].get("d"), Some(&Value::Null));
    }

    #[test]
    fn prepare_rejects_invalid_sql() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        assert!(matches!(
            backend.prepare("SELECT * FROM missing_table"),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn rollback_discards_writes() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
        let insert = backend.prepare("INSERT INTO t VALUES (?1)").unwrap();
        backend.begin().unwrap();
        backend.execute(&insert, &[Value::Integer(1)]).unwrap();
        backend.rollback().unwrap();

        let count = backend.prepare("SELECT COUNT(*) AS n FROM t").unwrap();
        let rows = backend.query(&count, &[]).unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(0)));
    }
}
