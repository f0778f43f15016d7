use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{eval, EngineError, Row, Transport};
use crate::query::CypherQuery;
use crate::value::{NodeValue, Props, RelValue};

#[derive(Clone, Debug, Default)]
pub(super) struct StoredNode {
    pub labels: Vec<String>,
    pub props: Props,
}

#[derive(Clone, Debug)]
pub(super) struct StoredRel {
    pub rel_type: String,
    pub start: u64,
    pub end: u64,
    pub props: Props,
}

/// One consistent version of the graph. Nodes and relationships share an id
/// space so `ID(x)` is unambiguous.
#[derive(Clone, Debug, Default)]
pub(super) struct GraphState {
    pub nodes: BTreeMap<u64, StoredNode>,
    pub rels: BTreeMap<u64, StoredRel>,
    next_id: u64,
}

impl GraphState {
    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn create_node(&mut self, labels: Vec<String>, props: Props) -> u64 {
        let id = self.allocate();
        self.nodes.insert(id, StoredNode { labels, props });
        id
    }

    pub fn create_rel(&mut self, rel_type: String, start: u64, end: u64, props: Props) -> u64 {
        let id = self.allocate();
        self.rels.insert(
            id,
            StoredRel {
                rel_type,
                start,
                end,
                props,
            },
        );
        id
    }

    pub fn node_value(&self, id: u64) -> Option<NodeValue> {
        self.nodes.get(&id).map(|node| NodeValue {
            id,
            labels: node.labels.clone(),
            properties: node.props.clone(),
        })
    }

    pub fn rel_value(&self, id: u64) -> Option<RelValue> {
        self.rels.get(&id).map(|rel| RelValue {
            id,
            rel_type: rel.rel_type.clone(),
            start: rel.start,
            end: rel.end,
            properties: rel.props.clone(),
        })
    }
}

/// Counters kept by [`MemoryGraph`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Queries received, including failed ones.
    pub queries: u64,
    /// Transactions opened.
    pub begins: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions rolled back.
    pub rollbacks: u64,
}

#[derive(Debug, Default)]
struct Inner {
    committed: GraphState,
    tx: Option<GraphState>,
    history: Vec<String>,
    failures: Vec<String>,
    stats: EngineStats,
}

impl Inner {
    fn visible(&self) -> &GraphState {
        self.tx.as_ref().unwrap_or(&self.committed)
    }
}

/// In-process graph engine that interprets [`CypherQuery`] clause lists.
///
/// Every statement runs against a copy of the visible state which replaces it
/// only on success, so a failed statement leaves no partial writes. An open
/// transaction works on a snapshot that `commit` publishes and `rollback`
/// discards.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: Mutex<Inner>,
}

impl MemoryGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters since creation.
    pub fn stats(&self) -> EngineStats {
        self.inner.lock().stats
    }

    /// Rendered text of every query received, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.inner.lock().history.clone()
    }

    /// Forgets recorded query text.
    pub fn clear_history(&self) {
        self.inner.lock().history.clear();
    }

    /// Makes every query whose text contains `needle` fail.
    pub fn fail_when(&self, needle: impl Into<String>) {
        self.inner.lock().failures.push(needle.into());
    }

    /// Removes injected failures.
    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.inner.lock().tx.is_some()
    }

    /// Nodes visible to the connection.
    pub fn node_count(&self) -> usize {
        self.inner.lock().visible().nodes.len()
    }

    /// Relationships visible to the connection.
    pub fn relationship_count(&self) -> usize {
        self.inner.lock().visible().rels.len()
    }

    /// Nodes carrying `label`, in id order.
    pub fn nodes_labeled(&self, label: &str) -> Vec<NodeValue> {
        let inner = self.inner.lock();
        let state = inner.visible();
        state
            .nodes
            .iter()
            .filter(|(_, node)| node.labels.iter().any(|l| l == label))
            .filter_map(|(id, _)| state.node_value(*id))
            .collect()
    }

    /// Relationships of `rel_type`, in id order.
    pub fn relationships_of_type(&self, rel_type: &str) -> Vec<RelValue> {
        let inner = self.inner.lock();
        let state = inner.visible();
        state
            .rels
            .iter()
            .filter(|(_, rel)| rel.rel_type == rel_type)
            .filter_map(|(id, _)| state.rel_value(*id))
            .collect()
    }
}

impl Transport for MemoryGraph {
    fn execute(&self, query: &CypherQuery) -> Result<Vec<Row>, EngineError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let text = query.to_cypher();
        inner.stats.queries += 1;
        inner.history.push(text.clone());
        if let Some(needle) = inner.failures.iter().find(|needle| text.contains(needle.as_str())) {
            return Err(EngineError::Failure(format!("injected failure on '{needle}'")));
        }

        let mut working = inner.visible().clone();
        let rows = eval::run(&mut working, query)?;
        if query.is_write() {
            match inner.tx.as_mut() {
                Some(tx) => *tx = working,
                None => inner.committed = working,
            }
        }
        trace!(rows = rows.len(), "Query evaluated");
        Ok(rows)
    }

    fn begin(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if inner.tx.is_some() {
            return Err(EngineError::Transaction("transaction already open".into()));
        }
        inner.tx = Some(inner.committed.clone());
        inner.stats.begins += 1;
        debug!(tx = inner.stats.begins, "Transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        let tx = inner
            .tx
            .take()
            .ok_or_else(|| EngineError::Transaction("no open transaction".into()))?;
        inner.committed = tx;
        inner.stats.commits += 1;
        debug!(tx = inner.stats.begins, "Transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if inner.tx.take().is_none() {
            return Err(EngineError::Transaction("no open transaction".into()));
        }
        inner.stats.rollbacks += 1;
        debug!(tx = inner.stats.begins, "Transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use crate::query::ast::{Clause, NodePattern, Pattern, ReturnItem};
    use crate::value::{Params, Value};

    fn create_student(name: &str) -> CypherQuery {
        let mut params = Params::new();
        params.insert("n_props", Value::Map(props! { "name" => name }));
        CypherQuery {
            clauses: vec![Clause::Create {
                patterns: vec![Pattern::node(NodePattern {
                    ident: "n".into(),
                    labels: vec!["Student".into()],
                    props: Some("n_props".into()),
                })],
            }],
            params,
        }
    }

    fn count_students() -> CypherQuery {
        CypherQuery {
            clauses: vec![
                Clause::Match {
                    optional: false,
                    patterns: vec![Pattern::node(NodePattern::labeled("n", vec!["Student".into()]))],
                    predicates: vec![],
                },
                Clause::Return {
                    items: vec![ReturnItem::Count {
                        ident: "n".into(),
                        distinct: false,
                    }],
                    distinct: false,
                    paging: Default::default(),
                },
            ],
            params: Params::new(),
        }
    }

    #[test]
    fn rollback_discards_writes() {
        let graph = MemoryGraph::new();
        graph.begin().expect("begin");
        graph.execute(&create_student("Jimmy")).expect("create");
        assert_eq!(graph.node_count(), 1);
        graph.rollback().expect("rollback");
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.stats().rollbacks, 1);
    }

    #[test]
    fn commit_publishes_writes() {
        let graph = MemoryGraph::new();
        graph.begin().expect("begin");
        graph.execute(&create_student("Jimmy")).expect("create");
        graph.commit().expect("commit");
        let rows = graph.execute(&count_students()).expect("count");
        assert_eq!(rows[0].get("count"), Some(&Value::Int(1)));
    }

    #[test]
    fn injected_failure_is_reported_and_recorded() {
        let graph = MemoryGraph::new();
        graph.fail_when("CREATE");
        let err = graph.execute(&create_student("Jimmy")).unwrap_err();
        assert!(matches!(err, EngineError::Failure(_)));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.history().len(), 1);
    }

    #[test]
    fn nested_begin_is_rejected() {
        let graph = MemoryGraph::new();
        graph.begin().expect("begin");
        assert!(matches!(graph.begin(), Err(EngineError::Transaction(_))));
        assert!(matches!(MemoryGraph::new().commit(), Err(EngineError::Transaction(_))));
    }
}
