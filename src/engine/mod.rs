//! Transport boundary to the graph engine, plus an in-process engine.

mod eval;
mod memory;
mod raw;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::query::CypherQuery;
use crate::value::Value;

pub use memory::{EngineStats, MemoryGraph};

/// One result row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Failure reported by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Generic execution failure.
    #[error("engine failure: {0}")]
    Failure(String),
    /// The query could not be understood.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// A write would violate a graph constraint.
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// Begin/commit/rollback misuse or failure.
    #[error("transaction error: {0}")]
    Transaction(String),
}

/// Synchronous connection to a graph engine.
///
/// `begin`/`commit`/`rollback` are flat; nesting is layered on top by
/// [`Session`](crate::Session).
pub trait Transport: Send + Sync {
    /// Runs one query and returns its rows.
    fn execute(&self, query: &CypherQuery) -> Result<Vec<Row>, EngineError>;
    /// Opens a transaction.
    fn begin(&self) -> Result<(), EngineError>;
    /// Commits the open transaction.
    fn commit(&self) -> Result<(), EngineError>;
    /// Discards the open transaction.
    fn rollback(&self) -> Result<(), EngineError>;
}
