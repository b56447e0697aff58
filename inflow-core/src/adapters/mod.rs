//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the TransactionStore port
//! - An in-process store for tests and tooling without a database file

pub mod duckdb;
pub mod memory;
