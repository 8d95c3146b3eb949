use std::cell::RefCell;
use std::rc::Rc;

use crate::backend::{Backend, Dialect};
use crate::cache::{QueryCache, QueryKey};
use crate::codec::PathCodec;
use crate::config::TreeOptions;
use crate::error::{Error, Result};
use crate::filter::FilterBuilder;
use crate::node::Node;
use crate::queries::{QueryBuilder, COUNT_ALIAS};
use crate::txn::TransactionRunner;
use crate::value::{Metadata, NodeId, Row, Value};

/// Coordinator for one materialized-path table.
///
/// Owns the naming, codec, query caches, and transaction capability; shares the connection.
/// All methods take `&self`: the connection and caches use interior mutability because every
/// operation is a sequence of blocking calls on a single thread.
pub struct TreeHandle<B: Backend> {
    conn: Rc<RefCell<B>>,
    options: TreeOptions,
    queries: QueryBuilder,
    cache: RefCell<QueryCache<B::Statement>>,
    txn: TransactionRunner,
    root: Node,
}

impl<B: Backend> Clone for TreeHandle<B> {
    /// Duplicates naming, codec, and query texts; shares the live connection and the
    /// prepared-statement cache.
    fn clone(&self) -> Self {
        Self {
            conn: Rc::clone(&self.conn),
            options: self.options.clone(),
            queries: self.queries.clone(),
            cache: RefCell::new(self.cache.borrow().clone()),
            txn: self.txn,
            root: self.root.clone(),
        }
    }
}

impl<B: Backend> std::fmt::Debug for TreeHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeHandle")
            .field("options", &self.options)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> TreeHandle<B> {
    pub fn open(backend: B, options: TreeOptions) -> Result<Self> {
        Self::open_shared(Rc::new(RefCell::new(backend)), options)
    }

    /// Open over a connection that other handles (for other tables) may also use.
    pub fn open_shared(conn: Rc<RefCell<B>>, options: TreeOptions) -> Result<Self> {
        options.validate()?;
        let dialect = conn.borrow().dialect();
        let queries = QueryBuilder::new(&options, dialect);

        check_schema(&conn, &queries, &options)?;
        let txn = TransactionRunner::detect(&mut *conn.borrow_mut());

        // Unpersisted view of the root until the row is loaded or created.
        let pending_root = Node::new(NodeId(Value::Null), options.codec.root_path(), Metadata::new());
        let mut tree = Self {
            conn,
            options,
            queries,
            cache: RefCell::new(QueryCache::new()),
            txn,
            root: pending_root,
        };
        tree.root = tree.load_or_create_root()?;
        tracing::info!(
            table = %tree.options.table,
            transactions = tree.txn.supported(),
            "opened materialized-path tree"
        );
        Ok(tree)
    }

    fn load_or_create_root(&self) -> Result<Node> {
        let root_path = self.codec().root_path();
        let existing = self.select_one(&QueryKey::SelectByPath, &[Value::Text(root_path.clone())])?;
        if let Some(root) = existing {
            return Ok(root);
        }
        if !self.options.auto_create_root {
            return Err(Error::Configuration(format!(
                "table {:?} has no root row at {root_path:?} and root creation is disabled",
                self.options.table
            )));
        }
        tracing::debug!(table = %self.options.table, "creating root row");
        self.insert_row(&root_path, &Metadata::new())
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn codec(&self) -> &PathCodec {
        &self.options.codec
    }

    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    pub fn supports_transactions(&self) -> bool {
        self.txn.supported()
    }

    pub fn connection(&self) -> Rc<RefCell<B>> {
        Rc::clone(&self.conn)
    }

    pub fn shares_connection_with(&self, other: &TreeHandle<B>) -> bool {
        Rc::ptr_eq(&self.conn, &other.conn)
    }

    /// True for clones of one handle; handles opened separately keep their own statements.
    pub fn shares_statements_with(&self, other: &TreeHandle<B>) -> bool {
        self.cache.borrow().shares_statements_with(&other.cache.borrow())
    }

    pub fn get(&self, id: &NodeId) -> Result<Node> {
        self.select_one(&QueryKey::SelectById, &[id.0.clone()])?
            .ok_or_else(|| Error::NotFound(format!("no row with id {id}")))
    }

    pub fn get_by_path(&self, path: &str) -> Result<Node> {
        self.codec().decode(path)?;
        self.select_one(&QueryKey::SelectByPath, &[Value::Text(path.to_string())])?
            .ok_or_else(|| Error::NotFound(format!("no row at path {path:?}")))
    }

    /// Rows anywhere in the table matching `filter`, in document order.
    pub fn find(&self, filter: &dyn FilterBuilder) -> Result<Vec<Node>> {
        let fragment = filter.to_sql(self.queries.dialect(), 1)?;
        let key = QueryKey::Find {
            subtree: false,
            predicate: fragment.sql,
        };
        self.select_nodes(&key, &fragment.params)
    }

    pub fn node_count(&self) -> Result<u64> {
        self.count(&QueryKey::CountAll, &[])
    }

    // ---- crate-internal plumbing used by `Node` ----

    pub(crate) fn statement(&self, key: &QueryKey) -> Result<B::Statement> {
        let sql = self
            .cache
            .borrow_mut()
            .text(key, || self.queries.build(key));
        let cache = self.cache.borrow();
        cache.statement(&sql, |text| self.conn.borrow_mut().prepare(text))
    }

    pub(crate) fn query_rows(&self, key: &QueryKey, params: &[Value]) -> Result<Vec<Row>> {
        let stmt = self.statement(key)?;
        self.conn.borrow_mut().query(&stmt, params)
    }

    pub(crate) fn execute(&self, key: &QueryKey, params: &[Value]) -> Result<u64> {
        let stmt = self.statement(key)?;
        self.conn.borrow_mut().execute(&stmt, params)
    }

    pub(crate) fn select_nodes(&self, key: &QueryKey, params: &[Value]) -> Result<Vec<Node>> {
        self.query_rows(key, params)?
            .into_iter()
            .map(|row| self.node_from_row(row))
            .collect()
    }

    pub(crate) fn select_one(&self, key: &QueryKey, params: &[Value]) -> Result<Option<Node>> {
        Ok(self.select_nodes(key, params)?.into_iter().next())
    }

    pub(crate) fn count(&self, key: &QueryKey, params: &[Value]) -> Result<u64> {
        let rows = self.query_rows(key, params)?;
        let value = rows
            .first()
            .and_then(|row| row.get(COUNT_ALIAS).or_else(|| row.get_index(0)))
            .ok_or_else(|| Error::Storage("count query returned no row".into()))?;
        match value {
            Value::Integer(n) => Ok((*n).max(0) as u64),
            other => Err(Error::Storage(format!("count query returned {other}"))),
        }
    }

    pub(crate) fn insert_row(&self, path: &str, metadata: &Metadata) -> Result<Node> {
        for column in [&self.options.id_column, &self.options.path_column] {
            if metadata.contains_key(column) {
                return Err(Error::InvalidOperation(format!(
                    "metadata may not set the structural column {column:?}"
                )));
            }
        }
        // BTreeMap iteration is sorted, so equal column sets share one cached statement.
        let columns: Vec<String> = metadata.keys().cloned().collect();
        let mut params = Vec::with_capacity(columns.len() + 1);
        params.push(Value::Text(path.to_string()));
        params.extend(metadata.values().cloned());
        self.select_one(&QueryKey::Insert(columns), &params)?
            .ok_or_else(|| Error::Storage(format!("insert at {path:?} returned no row")))
    }

    pub(crate) fn transaction<T>(
        &self,
        operation: &str,
        work: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.txn.run(&self.conn, operation, work)
    }

    pub(crate) fn dialect(&self) -> &Dialect {
        self.queries.dialect()
    }

    pub(crate) fn node_from_row(&self, mut row: Row) -> Result<Node> {
        let (id, path) = self.take_id_and_path(&mut row)?;
        Ok(Node::new(NodeId(id), path, row.into_metadata()))
    }

    pub(crate) fn id_and_path(&self, mut row: Row) -> Result<(Value, String)> {
        self.take_id_and_path(&mut row)
    }

    /// Every path read back from the store is decoded; a malformed one is corruption.
    fn take_id_and_path(&self, row: &mut Row) -> Result<(Value, String)> {
        let id = row.take(&self.options.id_column)?;
        let path = match row.take(&self.options.path_column)? {
            Value::Text(path) => path,
            other => {
                return Err(Error::malformed(
                    &other.to_string(),
                    "path column is not text",
                ))
            }
        };
        self.codec().decode(&path)?;
        Ok((id, path))
    }
}

fn check_schema<B: Backend>(
    conn: &Rc<RefCell<B>>,
    queries: &QueryBuilder,
    options: &TreeOptions,
) -> Result<()> {
    let run = |column: Option<&str>| -> Result<()> {
        let mut c = conn.borrow_mut();
        let stmt = c.prepare(&queries.column_check(column))?;
        c.query(&stmt, &[]).map(|_| ())
    };
    run(None).map_err(|e| {
        Error::Configuration(format!("table {:?} is not readable: {e}", options.table))
    })?;
    for column in [&options.id_column, &options.path_column] {
        run(Some(column)).map_err(|e| {
            Error::Configuration(format!(
                "table {:?} has no usable column {column:?}: {e}",
                options.table
            ))
        })?;
    }
    Ok(())
}
