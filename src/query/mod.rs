#![forbid(unsafe_code)]

//! Query construction and execution.
//!
//! Chains are built fluently, rendered to a structured [`CypherQuery`] and
//! sent through the session's transport only by terminal operations.

/// Structured Cypher: patterns, predicates, clauses and their rendering.
pub mod ast;

/// Immutable query chains and their builder operations.
mod chain;

/// Terminal operations that execute a chain.
mod exec;

/// Match-or-create fragments for single entities.
mod fragment;

/// Eager loading of associations into per-node caches.
mod preload;

/// Chain to query rendering.
mod render;

pub use ast::{CypherQuery, Direction};
pub use chain::{Chain, Condition, CountMode, MatchTarget};
pub use fragment::{FragmentBuilder, FragmentKind, QueryFragment};
pub use preload::Preload;
