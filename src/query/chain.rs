//! Lazy, immutable query chains.
//!
//! Every builder call returns a new [`Chain`]; nothing is sent to the engine
//! until a terminal operation (see `exec.rs`) asks for results.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::{EntityRef, Node, Relationship};
use crate::error::{OgmError, Result};
use crate::query::ast::{Direction, OrderItem};
use crate::schema::{NodeModel, RelModel};
use crate::session::Session;
use crate::value::{Params, Props, Value};

/// Materialized rows: the terminal node and, when the chain traversed a
/// relationship, the last relationship on the path.
pub(crate) type Records = Vec<(Node, Option<Relationship>)>;

/// Start of a chain.
#[derive(Clone, Debug)]
pub(crate) enum Anchor {
    /// Every node of a model.
    Model {
        ident: String,
        model: Arc<NodeModel>,
    },
    /// One node, located through its fragment.
    Entity { ident: String, node: Box<Node> },
}

impl Anchor {
    pub(crate) fn ident(&self) -> &str {
        match self {
            Anchor::Model { ident, .. } | Anchor::Entity { ident, .. } => ident,
        }
    }
}

/// One association hop.
#[derive(Clone, Debug)]
pub(crate) struct Traversal {
    pub association: String,
    pub from: String,
    pub direction: Direction,
    pub rel_type: Option<String>,
    pub target: Option<Arc<NodeModel>>,
    pub rel_model: Option<Arc<RelModel>>,
    pub ident: String,
    pub rel_ident: String,
}

/// Condition attached to one identifier; parameters are named at render time.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Filter {
    Props(Props),
    Raw { expr: String, params: Params },
    Id(u64),
    Ids(Vec<u64>),
    Key { key: String, value: Value },
    Keys { key: String, values: Vec<Value> },
    Never,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Update {
    Props(Props),
    Raw { expr: String, params: Params },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BulkOp {
    Delete { idents: Vec<String>, detach: bool },
    Set { ident: String, update: Update },
}

#[derive(Clone, Debug)]
pub(crate) enum Step {
    Filter { ident: String, filter: Filter },
    Association(Traversal),
    Optional(Traversal),
    /// Steps that only constrain existence; the terminal is unchanged.
    Branch(Vec<Step>),
    Order(OrderItem),
    LimitSkip {
        limit: Option<u64>,
        skip: Option<u64>,
    },
    /// Applies the paging gathered so far before any later traversal.
    PageRows,
    BulkOp(BulkOp),
}

/// Filter accepted by [`Chain::r#where`].
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `ident.key = value` for every entry; list values become `IN`.
    Props(Props),
    /// Caller-written expression and the parameters it references.
    Raw {
        /// Expression such as `p.name = {name}`.
        expr: String,
        /// Parameters referenced by the expression.
        params: Params,
    },
}

impl Condition {
    /// Raw expression with parameters.
    pub fn raw(expr: impl Into<String>, params: Params) -> Self {
        Condition::Raw {
            expr: expr.into(),
            params,
        }
    }
}

impl From<Props> for Condition {
    fn from(props: Props) -> Self {
        Condition::Props(props)
    }
}

impl From<&str> for Condition {
    fn from(expr: &str) -> Self {
        Condition::raw(expr, Params::new())
    }
}

impl From<String> for Condition {
    fn from(expr: String) -> Self {
        Condition::raw(expr, Params::new())
    }
}

/// Target of [`Chain::match_to`] and [`Chain::include`].
#[derive(Clone, Debug, PartialEq)]
pub enum MatchTarget {
    /// A persisted entity, matched on its internal id.
    Entity(EntityRef),
    /// A primary key value.
    Key(Value),
    /// Several entities or several keys, never mixed.
    Many(Vec<MatchTarget>),
    /// Matches nothing.
    Nothing,
}

impl From<&Node> for MatchTarget {
    fn from(node: &Node) -> Self {
        MatchTarget::Entity(node.entity().clone())
    }
}

impl From<&EntityRef> for MatchTarget {
    fn from(entity: &EntityRef) -> Self {
        MatchTarget::Entity(entity.clone())
    }
}

impl<T: Into<MatchTarget>> From<Option<T>> for MatchTarget {
    fn from(target: Option<T>) -> Self {
        target.map_or(MatchTarget::Nothing, Into::into)
    }
}

impl From<Vec<&Node>> for MatchTarget {
    fn from(nodes: Vec<&Node>) -> Self {
        MatchTarget::Many(nodes.into_iter().map(MatchTarget::from).collect())
    }
}

impl From<&[Node]> for MatchTarget {
    fn from(nodes: &[Node]) -> Self {
        MatchTarget::Many(nodes.iter().map(MatchTarget::from).collect())
    }
}

impl From<Value> for MatchTarget {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => MatchTarget::Nothing,
            Value::List(values) => MatchTarget::Many(values.into_iter().map(MatchTarget::from).collect()),
            other => MatchTarget::Key(other),
        }
    }
}

impl From<&str> for MatchTarget {
    fn from(key: &str) -> Self {
        MatchTarget::Key(Value::from(key))
    }
}

/// Counting mode of [`Chain::count_with`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountMode {
    /// Every row.
    All,
    /// Distinct bindings.
    Distinct,
}

impl FromStr for CountMode {
    type Err = OgmError;

    fn from_str(mode: &str) -> Result<Self> {
        match mode {
            "distinct" => Ok(CountMode::Distinct),
            other => Err(OgmError::invalid_parameter(format!(
                "count mode must be 'distinct', got '{other}'"
            ))),
        }
    }
}

/// An immutable, lazily executed query over the graph.
///
/// Builder methods return new chains with empty result caches, while a plain
/// `clone` carries over whatever the original has already cached. Terminal
/// operations execute against the session and cache what the caching rules
/// allow: `size` caches its count, materializing calls (`to_a`, `length`,
/// `first`, ...) cache the row set, and `count`/`exists` re-query until the
/// row set is cached.
pub struct Chain {
    pub(crate) session: Session,
    pub(crate) anchor: Anchor,
    pub(crate) steps: Vec<Step>,
    pub(crate) identity: String,
    pub(crate) model: Option<Arc<NodeModel>>,
    pub(crate) rel_identity: Option<String>,
    pub(crate) hops: usize,
    pub(crate) records: RwLock<Option<Arc<Records>>>,
    pub(crate) size: RwLock<Option<u64>>,
}

impl Clone for Chain {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            anchor: self.anchor.clone(),
            steps: self.steps.clone(),
            identity: self.identity.clone(),
            model: self.model.clone(),
            rel_identity: self.rel_identity.clone(),
            hops: self.hops,
            records: RwLock::new(self.records.read().clone()),
            size: RwLock::new(*self.size.read()),
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("anchor", &self.anchor.ident())
            .field("identity", &self.identity)
            .field("rel_identity", &self.rel_identity)
            .field("steps", &self.steps.len())
            .field("materialized", &self.records.read().is_some())
            .finish()
    }
}

impl Chain {
    pub(crate) fn for_model(session: Session, model: Arc<NodeModel>, ident: &str) -> Self {
        Self::from_anchor(
            session,
            Anchor::Model {
                ident: ident.to_owned(),
                model: model.clone(),
            },
            Some(model),
        )
    }

    pub(crate) fn for_node(session: Session, node: &Node) -> Self {
        let model = node.model().clone();
        let ident = match node.id() {
            Some(id) => format!("{}{id}", model.snake_name()),
            None => model.snake_name(),
        };
        Self::from_anchor(
            session,
            Anchor::Entity {
                ident,
                node: Box::new(node.clone()),
            },
            Some(model),
        )
    }

    fn from_anchor(session: Session, anchor: Anchor, model: Option<Arc<NodeModel>>) -> Self {
        Self {
            identity: anchor.ident().to_owned(),
            session,
            anchor,
            steps: Vec::new(),
            model,
            rel_identity: None,
            hops: 0,
            records: RwLock::new(None),
            size: RwLock::new(None),
        }
    }

    /// Same query, caches emptied.
    pub(crate) fn fresh(&self) -> Chain {
        Chain {
            session: self.session.clone(),
            anchor: self.anchor.clone(),
            steps: self.steps.clone(),
            identity: self.identity.clone(),
            model: self.model.clone(),
            rel_identity: self.rel_identity.clone(),
            hops: self.hops,
            records: RwLock::new(None),
            size: RwLock::new(None),
        }
    }

    pub(crate) fn derive(&self, step: Step) -> Chain {
        let mut next = self.fresh();
        next.steps.push(step);
        next
    }

    /// Session the chain executes against.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Identifier of the terminal node.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Identifier of the most recent relationship hop.
    pub fn rel_identity(&self) -> Option<&str> {
        self.rel_identity.as_deref()
    }

    /// Model of the terminal node; `None` for untyped associations.
    pub fn model(&self) -> Option<&Arc<NodeModel>> {
        self.model.as_ref()
    }

    /// Limit set on the chain, if any.
    pub fn limit_value(&self) -> Option<u64> {
        self.steps.iter().rev().find_map(|step| match step {
            Step::LimitSkip {
                limit: Some(limit), ..
            } => Some(*limit),
            _ => None,
        })
    }

    /// ANDs a filter on the terminal identifier.
    pub fn r#where(&self, condition: impl Into<Condition>) -> Chain {
        let ident = self.identity.clone();
        self.where_on(&ident, condition)
    }

    /// ANDs a filter on any identifier bound earlier in the chain.
    pub fn where_on(&self, ident: &str, condition: impl Into<Condition>) -> Chain {
        let filter = match condition.into() {
            Condition::Props(props) => Filter::Props(props),
            Condition::Raw { expr, params } => Filter::Raw { expr, params },
        };
        self.derive(Step::Filter {
            ident: ident.to_owned(),
            filter,
        })
    }

    /// Orders by a property of the terminal node, ascending.
    pub fn order(&self, key: &str) -> Chain {
        let ident = self.identity.clone();
        self.order_by(&ident, key, false)
    }

    /// Orders by a property of the terminal node, descending.
    pub fn order_desc(&self, key: &str) -> Chain {
        let ident = self.identity.clone();
        self.order_by(&ident, key, true)
    }

    /// Orders by `ident.key`.
    pub fn order_by(&self, ident: &str, key: &str, descending: bool) -> Chain {
        self.derive(Step::Order(OrderItem {
            ident: ident.to_owned(),
            key: key.to_owned(),
            descending,
        }))
    }

    /// Keeps at most `n` rows.
    pub fn limit(&self, n: i64) -> Result<Chain> {
        let limit = u64::try_from(n)
            .map_err(|_| OgmError::invalid_argument(format!("limit must not be negative, got {n}")))?;
        Ok(self.derive(Step::LimitSkip {
            limit: Some(limit),
            skip: None,
        }))
    }

    /// Drops the first `n` rows.
    pub fn skip(&self, n: u64) -> Chain {
        self.derive(Step::LimitSkip {
            limit: None,
            skip: Some(n),
        })
    }

    /// Follows an association of the terminal model.
    pub fn association(&self, name: &str) -> Result<Chain> {
        self.traverse(name, None, None, false)
    }

    /// Follows an association, binding the node (and optionally the
    /// relationship) to caller-chosen identifiers.
    pub fn association_as(&self, name: &str, ident: &str, rel_ident: Option<&str>) -> Result<Chain> {
        self.traverse(name, Some(ident), rel_ident, false)
    }

    /// Like [`association`](Chain::association), rendered as an optional
    /// match: rows without a match keep a null binding.
    pub fn optional(&self, name: &str) -> Result<Chain> {
        self.traverse(name, None, None, true)
    }

    /// Optional traversal with explicit identifiers.
    pub fn optional_as(&self, name: &str, ident: &str, rel_ident: Option<&str>) -> Result<Chain> {
        self.traverse(name, Some(ident), rel_ident, true)
    }

    fn traverse(
        &self,
        name: &str,
        ident: Option<&str>,
        rel_ident: Option<&str>,
        optional: bool,
    ) -> Result<Chain> {
        let model = self.model.as_ref().ok_or_else(|| OgmError::UnknownAssociation {
            model: format!("untyped `{}`", self.identity),
            association: name.to_owned(),
        })?;
        let resolved = self.session.schema().resolve(model, name)?;
        let hop = self.hops + 1;
        let ident = match ident {
            Some(ident) => ident.to_owned(),
            None => match (&self.anchor, self.hops) {
                (Anchor::Entity { .. }, 0) => {
                    format!("{}_{name}", self.session.config().association_prefix)
                }
                _ => format!("node{}", hop + 1),
            },
        };
        let rel_ident = rel_ident.map_or_else(|| format!("rel{hop}"), str::to_owned);
        let traversal = Traversal {
            association: resolved.name,
            from: self.identity.clone(),
            direction: resolved.direction,
            rel_type: resolved.rel_type,
            target: resolved.target.clone(),
            rel_model: resolved.rel_model,
            ident: ident.clone(),
            rel_ident: rel_ident.clone(),
        };
        let mut next = self.derive(if optional {
            Step::Optional(traversal)
        } else {
            Step::Association(traversal)
        });
        next.identity = ident;
        next.model = resolved.target;
        next.rel_identity = Some(rel_ident);
        next.hops = hop;
        Ok(next)
    }

    /// Constrains the chain by a sub-chain built from the current terminal;
    /// the terminal identifier is unchanged.
    pub fn branch<F>(&self, transform: F) -> Result<Chain>
    where
        F: FnOnce(Chain) -> Result<Chain>,
    {
        self.branch_with(Some(transform))
    }

    /// [`branch`](Chain::branch) with an optional transform; `None` fails
    /// with [`OgmError::MissingTransform`].
    pub fn branch_with<F>(&self, transform: Option<F>) -> Result<Chain>
    where
        F: FnOnce(Chain) -> Result<Chain>,
    {
        let transform = transform.ok_or(OgmError::MissingTransform)?;
        let prefix = self.steps.len();
        let sub = transform(self.fresh())?;
        let added = sub.steps.get(prefix..).map(<[Step]>::to_vec).unwrap_or_default();
        let mut next = self.derive(Step::Branch(added));
        next.hops = sub.hops.max(self.hops);
        Ok(next)
    }

    /// Restricts the terminal identifier to `target`.
    pub fn match_to(&self, target: impl Into<MatchTarget>) -> Result<Chain> {
        let ident = self.identity.clone();
        self.match_ident(&ident, target.into())
    }

    pub(crate) fn match_ident(&self, ident: &str, target: MatchTarget) -> Result<Chain> {
        let filter = self.target_filter(ident, target)?;
        Ok(self.derive(Step::Filter {
            ident: ident.to_owned(),
            filter,
        }))
    }

    fn target_filter(&self, ident: &str, target: MatchTarget) -> Result<Filter> {
        match target {
            MatchTarget::Nothing => Ok(Filter::Never),
            MatchTarget::Entity(entity) => entity_id(&entity).map(Filter::Id),
            MatchTarget::Key(value) => Ok(Filter::Key {
                key: self.key_for(ident)?,
                value,
            }),
            MatchTarget::Many(targets) => {
                if targets.is_empty() {
                    return Ok(Filter::Never);
                }
                if targets.iter().all(|t| matches!(t, MatchTarget::Entity(_))) {
                    let ids = targets
                        .iter()
                        .filter_map(|t| match t {
                            MatchTarget::Entity(entity) => Some(entity_id(entity)),
                            _ => None,
                        })
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(Filter::Ids(ids));
                }
                if targets.iter().all(|t| matches!(t, MatchTarget::Key(_))) {
                    let values = targets
                        .into_iter()
                        .filter_map(|t| match t {
                            MatchTarget::Key(value) => Some(value),
                            _ => None,
                        })
                        .collect();
                    return Ok(Filter::Keys {
                        key: self.key_for(ident)?,
                        values,
                    });
                }
                Err(OgmError::invalid_parameter(
                    "match_to collections must hold only entities or only keys",
                ))
            }
        }
    }

    fn key_for(&self, ident: &str) -> Result<String> {
        self.model_of(ident)
            .and_then(|model| model.primary_key_name().map(str::to_owned))
            .or_else(|| self.session.config().primary_key.clone())
            .ok_or_else(|| {
                OgmError::invalid_parameter(format!("`{ident}` has no primary key to match on"))
            })
    }

    /// Model bound to `ident` anywhere in the chain.
    pub(crate) fn model_of(&self, ident: &str) -> Option<Arc<NodeModel>> {
        fn scan(steps: &[Step], ident: &str) -> Option<Option<Arc<NodeModel>>> {
            steps.iter().rev().find_map(|step| match step {
                Step::Association(t) | Step::Optional(t) if t.ident == ident => Some(t.target.clone()),
                Step::Branch(sub) => scan(sub, ident),
                _ => None,
            })
        }
        if let Some(found) = scan(&self.steps, ident) {
            return found;
        }
        match &self.anchor {
            Anchor::Model { ident: anchor, model } if anchor == ident => Some(model.clone()),
            Anchor::Entity { ident: anchor, node } if anchor == ident => Some(node.model().clone()),
            _ => None,
        }
    }

    /// Whether `ident` names a relationship hop.
    pub(crate) fn is_rel_ident(&self, ident: &str) -> bool {
        fn scan(steps: &[Step], ident: &str) -> bool {
            steps.iter().any(|step| match step {
                Step::Association(t) | Step::Optional(t) => t.rel_ident == ident,
                Step::Branch(sub) => scan(sub, ident),
                _ => false,
            })
        }
        scan(&self.steps, ident)
    }

    /// Relationship model of the hop bound to `rel_ident`.
    pub(crate) fn rel_model_of(&self, rel_ident: &str) -> Option<Arc<RelModel>> {
        fn scan(steps: &[Step], ident: &str) -> Option<Option<Arc<RelModel>>> {
            steps.iter().rev().find_map(|step| match step {
                Step::Association(t) | Step::Optional(t) if t.rel_ident == ident => {
                    Some(t.rel_model.clone())
                }
                Step::Branch(sub) => scan(sub, ident),
                _ => None,
            })
        }
        scan(&self.steps, rel_ident).flatten()
    }

    /// The anchor node and association when the chain is exactly one hop off
    /// an entity.
    pub(crate) fn association_origin(&self) -> Option<(&Node, &str)> {
        let Anchor::Entity { node, ident } = &self.anchor else {
            return None;
        };
        let mut hops = self.steps.iter().filter_map(|step| match step {
            Step::Association(t) => Some(t),
            _ => None,
        });
        let first = hops.next()?;
        if hops.next().is_some() || &first.from != ident {
            return None;
        }
        Some((node.as_ref(), first.association.as_str()))
    }

    pub(crate) fn cached_records(&self) -> Option<Arc<Records>> {
        self.records.read().clone()
    }

    pub(crate) fn store_records(&self, records: Arc<Records>) {
        *self.records.write() = Some(records);
    }
}

fn entity_id(entity: &EntityRef) -> Result<u64> {
    entity
        .id()
        .filter(|_| entity.stored())
        .ok_or_else(|| OgmError::invalid_parameter("match_to needs a persisted entity"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mode_parses_distinct_only() {
        assert_eq!("distinct".parse::<CountMode>().ok(), Some(CountMode::Distinct));
        assert!(matches!(
            "foo".parse::<CountMode>(),
            Err(OgmError::InvalidParameter(_))
        ));
    }

    #[test]
    fn null_value_targets_nothing() {
        assert_eq!(MatchTarget::from(Value::Null), MatchTarget::Nothing);
        assert_eq!(MatchTarget::from(None::<&Node>), MatchTarget::Nothing);
        assert_eq!(
            MatchTarget::from(Value::List(vec![Value::from("a")])),
            MatchTarget::Many(vec![MatchTarget::Key(Value::from("a"))])
        );
    }

    #[test]
    fn clone_keeps_cached_rows_but_builders_start_empty() {
        use crate::engine::MemoryGraph;
        use crate::schema::Schema;

        let session = Session::new(
            Arc::new(MemoryGraph::new()),
            Schema::new().node(NodeModel::new("Student")),
        );
        let chain = session.all("Student").expect("chain");
        chain.store_records(Arc::new(Vec::new()));
        assert!(chain.clone().cached_records().is_some());
        assert!(chain.fresh().cached_records().is_none());
        assert!(chain.order("name").cached_records().is_none());
    }
}
