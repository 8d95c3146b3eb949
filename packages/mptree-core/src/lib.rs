#![forbid(unsafe_code)]
//! Materialized-path trees stored in a relational table.
//!
//! Each row's position is a sortable path string (`0001.0003.0002`), so ancestor, descendant,
//! subtree, and sibling lookups are single indexed range queries, and structural edits touch
//! only the rows they move. The crate is independent of any database driver: engines plug in
//! through [`Backend`].

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod node;
pub mod queries;
pub mod traverse;
pub mod tree;
pub mod txn;
pub mod value;

pub use backend::{Backend, Dialect};
pub use cache::{QueryCache, QueryKey};
pub use codec::{PathCodec, Position};
pub use config::TreeOptions;
pub use error::{Error, Result};
pub use filter::{Comparison, FilterBuilder, Predicate, SqlFragment};
pub use node::Node;
pub use traverse::Traversal;
pub use tree::TreeHandle;
pub use txn::TransactionRunner;
pub use value::{metadata, Metadata, NodeId, Row, Value};
