//! Object-graph mapping over a Cypher-speaking graph engine.
//!
//! Models are declared in a [`Schema`]; a [`Session`] ties the schema to a
//! [`Transport`](engine::Transport). Query chains ([`Chain`]) are immutable
//! and lazy: builder calls only describe the query, terminal operations run
//! it. Relationship saves create missing endpoints in the same transaction.
//!
//! ```
//! use std::sync::Arc;
//! use cypher_ogm::engine::MemoryGraph;
//! use cypher_ogm::schema::{Association, NodeModel};
//! use cypher_ogm::{props, Direction, Node, Schema, Session};
//!
//! let schema = Schema::new()
//!     .node(NodeModel::new("Teacher").has_many(
//!         Association::new("lessons", Direction::Out).target("Lesson").rel_type("teaching_lesson"),
//!     ))
//!     .node(NodeModel::new("Lesson"));
//! let session = Session::new(Arc::new(MemoryGraph::new()), schema);
//!
//! let mut adams = Node::create(&session, "Teacher", props! { "name" => "Mr Adams" })?;
//! let mut math = Node::new(&session, "Lesson", props! { "name" => "math" })?;
//! adams.connect(&session, "lessons", &mut math)?;
//!
//! assert_eq!(adams.association(&session, "lessons")?.count()?, 1);
//! # Ok::<(), cypher_ogm::OgmError>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod query;
pub mod schema;
pub mod session;
pub mod value;

pub use config::OgmConfig;
pub use entity::{EntityRef, Errors, Hooks, Node, Relationship};
pub use error::{OgmError, Result, Side};
pub use metrics::MetricsSnapshot;
pub use query::{Chain, Condition, CountMode, CypherQuery, Direction, MatchTarget, Preload};
pub use schema::Schema;
pub use session::{Session, TxOutcome, TxScope, TxState, TxTicket};
pub use value::{Params, Props, Value};
