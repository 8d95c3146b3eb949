#![forbid(unsafe_code)]
//! Postgres backend for `mptree-core`.
//!
//! Uses the blocking `postgres` client so the engine's synchronous model maps directly onto
//! server round-trips. Works on vanilla PostgreSQL and compatible hosted services.
//!
//! Path comparisons are issued with `COLLATE "C"` so subtree ranges follow byte order. Tables
//! from [`create_table`] declare the path column that way; for an existing table, call
//! [`verify_path_collation`] before opening it, since a column under a linguistic collation
//! still returns correct rows but cannot serve those ranges from its index.

mod backend;
mod param;

pub use backend::{create_table, verify_path_collation, PostgresBackend};
