use crate::error::Result;
use crate::value::{Row, Value};

/// SQL surface differences between engines. Everything else the engine emits is portable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dialect {
    /// Prefix of numbered placeholders (`?1` / `$1`).
    pub placeholder_prefix: char,
    /// Collation clause appended to the path column wherever it is compared or ordered, so
    /// that database order is byte order.
    pub path_collation: Option<&'static str>,
}

impl Dialect {
    pub const SQLITE: Dialect = Dialect {
        placeholder_prefix: '?',
        path_collation: None,
    };

    pub const POSTGRES: Dialect = Dialect {
        placeholder_prefix: '$',
        path_collation: Some("\"C\""),
    };

    pub fn placeholder(&self, index: usize) -> String {
        format!("{}{index}", self.placeholder_prefix)
    }
}

/// Open, authenticated handle to a relational store.
///
/// Errors are surfaced as opaque [`crate::Error::Storage`] values; the engine never interprets
/// them beyond propagating.
pub trait Backend {
    /// Reusable prepared execution handle.
    type Statement: Clone;

    fn dialect(&self) -> Dialect;
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement>;
    /// Run a statement that returns no rows; yields the affected row count.
    fn execute(&mut self, stmt: &Self::Statement, params: &[Value]) -> Result<u64>;
    fn query(&mut self, stmt: &Self::Statement, params: &[Value]) -> Result<Vec<Row>>;
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}
