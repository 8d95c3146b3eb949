use postgres::types::ToSql;
use postgres::{Client, Statement};

use mptree_core::config::quote_ident;
use mptree_core::{Backend, Dialect, Error, Result, Row, TreeOptions, Value};

use crate::param::{from_column, PgParam};

fn storage_debug<E: std::fmt::Debug>(e: E) -> Error {
    Error::Storage(format!("{e:?}"))
}

/// `Backend` over one blocking Postgres client. Statements are server-side prepared
/// statements, reusable for the life of the connection.
pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, postgres::NoTls).map_err(storage_debug)?;
        Ok(Self::new(client))
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

/// Create the tree table if missing: bigserial id, unique path, plus `extra_columns`. The path
/// index uses "C" collation so range scans follow byte order.
pub fn create_table(
    client: &mut Client,
    options: &TreeOptions,
    extra_columns: &[&str],
) -> Result<()> {
    let table = quote_ident(&options.table);
    let path = quote_ident(&options.path_column);
    let mut columns = vec![
        format!("{} BIGSERIAL PRIMARY KEY", quote_ident(&options.id_column)),
        format!("{path} TEXT COLLATE \"C\" NOT NULL UNIQUE"),
    ];
    columns.extend(extra_columns.iter().map(|c| c.to_string()));
    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            columns.join(", ")
        ))
        .map_err(storage_debug)
}

/// Check that the path column compares bytewise.
///
/// Generated range scans append `COLLATE "C"` to path comparisons, so a path column under any
/// other collation cannot use its index for them and falls back to sequential scans. Tables made
/// by [`create_table`] pass; for others this returns [`Error::Configuration`] naming the column's
/// collation. A column without an explicit collation inherits the database default.
pub fn verify_path_collation(client: &mut Client, options: &TreeOptions) -> Result<()> {
    let column = client
        .query_opt(
            "SELECT collation_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
            &[&options.table, &options.path_column],
        )
        .map_err(storage_debug)?
        .ok_or_else(|| {
            Error::Configuration(format!(
                "column {}.{} does not exist",
                options.table, options.path_column
            ))
        })?;
    let collation = match column.try_get::<_, Option<String>>(0).map_err(storage_debug)? {
        Some(name) => name,
        None => client
            .query_one(
                "SELECT datcollate::text FROM pg_database WHERE datname = current_database()",
                &[],
            )
            .map_err(storage_debug)?
            .try_get::<_, String>(0)
            .map_err(storage_debug)?,
    };
    if collation == "C" || collation == "POSIX" {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "path column {}.{} uses collation {collation:?}; range scans need \"C\"",
            options.table, options.path_column
        )))
    }
}

fn bind(params: &[Value]) -> Vec<PgParam<'_>> {
    params.iter().map(PgParam).collect()
}

impl Backend for PostgresBackend {
    type Statement = Statement;

    fn dialect(&self) -> Dialect {
        Dialect::POSTGRES
    }

    fn prepare(&mut self, sql: &str) -> Result<Statement> {
        self.client.prepare(sql).map_err(storage_debug)
    }

    fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64> {
        let bound = bind(params);
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.client.execute(stmt, &refs).map_err(storage_debug)
    }

    fn query(&mut self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>> {
        let bound = bind(params);
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(stmt, &refs).map_err(storage_debug)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut columns = Vec::with_capacity(row.len());
            for (i, column) in row.columns().iter().enumerate() {
                let value = from_column(&row, i).map_err(storage_debug)?;
                columns.push((column.name().to_string(), value));
            }
            out.push(Row::new(columns));
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").map_err(storage_debug)
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").map_err(storage_debug)
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").map_err(storage_debug)
    }
}
