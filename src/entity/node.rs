use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{EntityRef, Errors, Relationship};
use crate::error::{OgmError, Result};
use crate::query::ast::{Clause, CypherQuery, Paging, ReturnItem, SetItem};
use crate::query::{Chain, Direction, FragmentKind};
use crate::schema::{NodeModel, RelModel};
use crate::session::{Session, TxTicket};
use crate::value::{NodeValue, Props, Value};

const IDENT: &str = "n";

/// Rows stored for one association call by a preload.
#[derive(Clone, Debug, Default)]
pub struct CachedAssociation {
    records: Vec<(Node, Option<Relationship>)>,
}

impl CachedAssociation {
    pub(crate) fn new(records: Vec<(Node, Option<Relationship>)>) -> Self {
        Self { records }
    }

    /// Cached nodes, in row order.
    pub fn nodes(&self) -> Vec<Node> {
        self.records.iter().map(|(node, _)| node.clone()).collect()
    }

    /// Number of cached rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// The association was preloaded and came back empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn records(&self) -> &[(Node, Option<Relationship>)] {
        &self.records
    }
}

/// Per-node cache of preloaded associations, keyed by the cache key of the
/// association chain that would have fetched them. Clones share the cache.
#[derive(Clone, Default)]
pub struct AssociationCache(Arc<RwLock<HashMap<String, CachedAssociation>>>);

impl AssociationCache {
    /// Entry for `key`.
    pub fn get(&self, key: &str) -> Option<CachedAssociation> {
        self.0.read().get(key).cloned()
    }

    /// Stores an entry, replacing any previous one.
    pub fn insert(&self, key: String, entry: CachedAssociation) {
        self.0.write().insert(key, entry);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.0.write().clear();
    }

    /// Number of cached association calls.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Nothing cached.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl fmt::Debug for AssociationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationCache")
            .field("entries", &self.len())
            .finish()
    }
}

/// An instance of a node model.
#[derive(Clone, Debug)]
pub struct Node {
    model: Arc<NodeModel>,
    entity: EntityRef,
    errors: Errors,
    cache: AssociationCache,
    destroyed: bool,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => self.model.name() == other.model.name() && self.entity == other.entity,
        }
    }
}

impl Node {
    /// Unsaved instance of the named model.
    pub fn new(session: &Session, model: &str, props: Props) -> Result<Node> {
        Ok(Self::instantiate(session, session.model(model)?, props))
    }

    /// Instantiates and saves. Check [`persisted`](Node::persisted) and
    /// [`errors`](Node::errors) to see whether the save went through.
    pub fn create(session: &Session, model: &str, props: Props) -> Result<Node> {
        let mut node = Self::new(session, model, props)?;
        node.save(session)?;
        Ok(node)
    }

    pub(crate) fn instantiate(session: &Session, model: Arc<NodeModel>, mut props: Props) -> Node {
        let primary_key = primary_key_of(session, &model);
        if let Some(key) = &primary_key {
            let missing = props.get(key).map_or(true, Value::is_null);
            if missing {
                props.insert(key.clone(), Value::String(Uuid::new_v4().to_string()));
            }
        }
        let entity = EntityRef::new_node(model.labels().to_vec(), props, primary_key);
        Self::from_parts(model, entity)
    }

    pub(crate) fn load(
        session: &Session,
        value: &NodeValue,
        fallback: Option<&Arc<NodeModel>>,
    ) -> Result<Node> {
        let model = session
            .schema()
            .model_for_labels(&value.labels)
            .or_else(|| fallback.cloned())
            .ok_or_else(|| OgmError::UnknownModel(value.labels.join(":")))?;
        let entity = EntityRef::loaded_node(value, primary_key_of(session, &model));
        Ok(Self::from_parts(model, entity))
    }

    fn from_parts(model: Arc<NodeModel>, entity: EntityRef) -> Node {
        Node {
            model,
            entity,
            errors: Errors::default(),
            cache: AssociationCache::default(),
            destroyed: false,
        }
    }

    /// Model this node belongs to.
    pub fn model(&self) -> &Arc<NodeModel> {
        &self.model
    }

    /// Persistence view.
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Engine-internal id once stored.
    pub fn id(&self) -> Option<u64> {
        self.entity.id()
    }

    /// Primary key value, when the model has one.
    pub fn key(&self) -> Option<&Value> {
        self.entity.primary_key().and_then(|key| self.entity.get(key))
    }

    /// Whether the write that stored the node has committed.
    pub fn persisted(&self) -> bool {
        self.entity.persisted()
    }

    pub(crate) fn stored(&self) -> bool {
        self.entity.stored()
    }

    /// Whether [`destroy`](Node::destroy) removed the node.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Reads a property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entity.get(key)
    }

    /// Writes a property locally; [`save`](Node::save) stores it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entity.set(key, value);
    }

    /// All properties.
    pub fn properties(&self) -> &Props {
        self.entity.properties()
    }

    /// Validation failures of the last save.
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub(crate) fn errors_mut(&mut self) -> &mut Errors {
        &mut self.errors
    }

    pub(crate) fn mark_stored(&mut self, value: &NodeValue, ticket: &TxTicket) {
        self.entity.mark_stored(value.id, ticket);
        self.entity.reload(value.properties.clone());
    }

    /// Preloaded associations.
    pub fn association_cache(&self) -> &AssociationCache {
        &self.cache
    }

    /// Creates or updates the node. Returns false when validation or a
    /// callback halted the save; nothing is written in that case.
    pub fn save(&mut self, session: &Session) -> Result<bool> {
        self.errors.clear();
        if self.destroyed {
            return Err(OgmError::NotPersisted(format!("destroyed {}", self.model.name())));
        }
        if self.entity.stored() {
            return self.update(session);
        }
        let scope = session.begin_scope()?;
        match self.insert(session)? {
            Some(created) => {
                self.mark_stored(&created, scope.ticket());
                scope.commit()?;
                debug!(model = %self.model.name(), id = created.id, "Node created");
                Ok(true)
            }
            None => {
                scope.abort()?;
                Ok(false)
            }
        }
    }

    /// Hooks around `CREATE (n:Label $n_props) RETURN n`. `None` when a hook
    /// halted.
    fn insert(&mut self, session: &Session) -> Result<Option<NodeValue>> {
        let fragment = self.entity.to_fragment(IDENT);
        let FragmentKind::Create { pattern } = fragment.kind().clone() else {
            return Ok(None);
        };
        let query = CypherQuery {
            clauses: vec![
                Clause::Create {
                    patterns: vec![pattern],
                },
                Clause::Return {
                    items: vec![ReturnItem::Ident(IDENT.into())],
                    distinct: false,
                    paging: Paging::default(),
                },
            ],
            params: fragment.params().clone(),
        };
        let primary_key = self.entity.primary_key().map(str::to_owned);
        let mut created = None;
        let completed = self
            .model
            .lifecycle()
            .run_create_steps(&self.entity, &mut self.errors, || {
                let rows = session.execute(&query)?;
                let value = rows
                    .first()
                    .and_then(|row| row.get(IDENT))
                    .and_then(Value::as_node)
                    .cloned();
                let loaded = value
                    .as_ref()
                    .map(|value| EntityRef::loaded_node(value, primary_key.clone()));
                created = value;
                Ok(loaded)
            })?;
        Ok(created.filter(|_| completed))
    }

    fn update(&mut self, session: &Session) -> Result<bool> {
        if !self.model.lifecycle().is_valid(&self.entity, &mut self.errors) {
            return Ok(false);
        }
        let mut query = self.match_query();
        let param = query
            .params
            .insert_unique(&format!("{IDENT}_props"), Value::Map(self.entity.properties().clone()));
        query.clauses.push(Clause::Set {
            items: vec![SetItem::Replace {
                ident: IDENT.into(),
                param,
            }],
        });
        session.execute(&query)?;
        Ok(true)
    }

    /// `MATCH (n) WHERE <identity>` for this persisted node.
    fn match_query(&self) -> CypherQuery {
        let fragment = self.entity.to_fragment(IDENT);
        let (patterns, predicates) = match fragment.kind() {
            FragmentKind::Match { pattern, predicate } => (vec![pattern.clone()], vec![predicate.clone()]),
            FragmentKind::Create { pattern } => (vec![pattern.clone()], Vec::new()),
        };
        CypherQuery {
            clauses: vec![Clause::Match {
                optional: false,
                patterns,
                predicates,
            }],
            params: fragment.params().clone(),
        }
    }

    /// Runs destroy callbacks around `DETACH DELETE`. Returns false when a
    /// before-destroy callback halted.
    pub fn destroy(&mut self, session: &Session) -> Result<bool> {
        if !self.entity.stored() || self.destroyed {
            return Err(OgmError::NotPersisted(self.model.name().to_owned()));
        }
        let hooks = self.model.lifecycle();
        if !hooks.run_before_destroy(&self.entity) {
            return Ok(false);
        }
        let mut query = self.match_query();
        query.clauses.push(Clause::Delete {
            detach: true,
            idents: vec![IDENT.into()],
        });
        session.execute(&query)?;
        self.destroyed = true;
        self.cache.clear();
        debug!(model = %self.model.name(), id = self.id(), "Node destroyed");
        Ok(hooks.run_after_destroy(&self.entity))
    }

    /// Whether the node is still in the graph.
    pub fn exists_in(&self, session: &Session) -> Result<bool> {
        if !self.entity.stored() || self.destroyed {
            return Ok(false);
        }
        let mut query = self.match_query();
        query.clauses.push(Clause::Return {
            items: vec![ReturnItem::Count {
                ident: IDENT.into(),
                distinct: false,
            }],
            distinct: false,
            paging: Paging::default(),
        });
        let rows = session.execute(&query)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_int)
            .is_some_and(|count| count > 0))
    }

    /// Chain starting at this node and following `name`.
    pub fn association(&self, session: &Session, name: &str) -> Result<Chain> {
        Chain::for_node(session.clone(), self).association(name)
    }

    /// [`association`](Node::association) with explicit identifiers.
    pub fn association_as(
        &self,
        session: &Session,
        name: &str,
        ident: &str,
        rel_ident: Option<&str>,
    ) -> Result<Chain> {
        Chain::for_node(session.clone(), self).association_as(name, ident, rel_ident)
    }

    /// Creates the relationship behind association `name` to `other`,
    /// saving whichever endpoints are not yet stored.
    pub fn connect(&mut self, session: &Session, name: &str, other: &mut Node) -> Result<bool> {
        let resolved = session.schema().resolve(&self.model, name)?;
        let rel_model = match (resolved.rel_model, resolved.rel_type) {
            (Some(model), _) => model,
            (None, Some(rel_type)) => Arc::new(RelModel::anonymous(rel_type)),
            (None, None) => {
                return Err(OgmError::invalid_argument(format!(
                    "association '{name}' has no relationship type to create"
                )))
            }
        };
        let mut rel = Relationship::new(rel_model, Props::new());
        let saved = match resolved.direction {
            Direction::In => rel.save(session, other, self)?,
            Direction::Out | Direction::Both => rel.save(session, self, other)?,
        };
        self.cache.clear();
        other.cache.clear();
        Ok(saved)
    }
}

fn primary_key_of(session: &Session, model: &NodeModel) -> Option<String> {
    model
        .primary_key_name()
        .map(str::to_owned)
        .or_else(|| session.config().primary_key.clone())
}
