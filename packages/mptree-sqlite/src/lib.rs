#![forbid(unsafe_code)]
//! SQLite backend for `mptree-core`, built on rusqlite with a bundled SQLite.

mod backend;

pub use backend::{SqliteBackend, SqliteStatement};

use mptree_core::{Result, TreeHandle, TreeOptions};

/// Open a tree over an in-memory database after creating its table with `extra_columns`
/// (SQL column definitions) alongside the id and path columns.
pub fn in_memory_tree(
    options: TreeOptions,
    extra_columns: &[&str],
) -> Result<TreeHandle<SqliteBackend>> {
    let backend = SqliteBackend::open_in_memory()?;
    backend.create_table(&options, extra_columns)?;
    TreeHandle::open(backend, options)
}
