use std::sync::Arc;

use tracing::debug;

use super::{EntityRef, Errors, Node};
use crate::error::{OgmError, Result};
use crate::persistence::RelationshipTxPlanner;
use crate::query::ast::{Clause, CypherQuery, SetItem};
use crate::query::FragmentKind;
use crate::schema::RelModel;
use crate::session::{Session, TxTicket};
use crate::value::{Props, RelValue, Value};

const IDENT: &str = "r";

/// An instance of a relationship model.
#[derive(Clone, Debug)]
pub struct Relationship {
    model: Arc<RelModel>,
    entity: EntityRef,
    start: Option<u64>,
    end: Option<u64>,
    errors: Errors,
    destroyed: bool,
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => self.entity == other.entity,
        }
    }
}

impl Relationship {
    /// Unsaved relationship: the model's defaults overlaid with `props`.
    pub fn new(model: Arc<RelModel>, props: Props) -> Self {
        let mut properties = model.defaults().clone();
        properties.extend(props);
        Self {
            entity: EntityRef::new_relationship(model.rel_type(), properties),
            model,
            start: None,
            end: None,
            errors: Errors::default(),
            destroyed: false,
        }
    }

    /// Unsaved instance of the named relationship model.
    pub fn build(session: &Session, model: &str, props: Props) -> Result<Self> {
        Ok(Self::new(session.schema().rel_model(model)?, props))
    }

    pub(crate) fn load(session: &Session, value: &RelValue, hint: Option<&Arc<RelModel>>) -> Self {
        let model = hint
            .filter(|model| model.rel_type() == value.rel_type)
            .cloned()
            .or_else(|| session.schema().rel_model_for_type(&value.rel_type))
            .unwrap_or_else(|| Arc::new(RelModel::anonymous(value.rel_type.as_str())));
        Self {
            model,
            entity: EntityRef::loaded_relationship(value),
            start: Some(value.start),
            end: Some(value.end),
            errors: Errors::default(),
            destroyed: false,
        }
    }

    /// Model of this relationship.
    pub fn model(&self) -> &Arc<RelModel> {
        &self.model
    }

    /// Persistence view.
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Relationship type.
    pub fn rel_type(&self) -> &str {
        self.model.rel_type()
    }

    /// Engine-internal id once stored.
    pub fn id(&self) -> Option<u64> {
        self.entity.id()
    }

    /// Internal id of the start node, once known.
    pub fn start_id(&self) -> Option<u64> {
        self.start
    }

    /// Internal id of the end node, once known.
    pub fn end_id(&self) -> Option<u64> {
        self.end
    }

    /// Whether the write that stored the relationship has committed.
    pub fn persisted(&self) -> bool {
        self.entity.persisted()
    }

    /// Whether [`destroy`](Relationship::destroy) removed it.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Reads a property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entity.get(key)
    }

    /// Writes a property locally.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entity.set(key, value);
    }

    /// Validation failures of the last save.
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub(crate) fn errors_mut(&mut self) -> &mut Errors {
        &mut self.errors
    }

    pub(crate) fn mark_stored(&mut self, value: &RelValue, ticket: &TxTicket) {
        self.entity.mark_stored(value.id, ticket);
        self.entity.reload(value.properties.clone());
        self.start = Some(value.start);
        self.end = Some(value.end);
    }

    /// Stores the relationship between `from` and `to`, saving unsaved
    /// endpoints in the same transaction. Returns false when validation or a
    /// callback halted; nothing is written in that case.
    pub fn save(&mut self, session: &Session, from: &mut Node, to: &mut Node) -> Result<bool> {
        if self.entity.stored() {
            return self.update(session);
        }
        RelationshipTxPlanner::new(session, self, from, to).save()
    }

    /// [`save`](Relationship::save) that turns `false` into
    /// [`OgmError::InvalidRelationship`].
    pub fn save_strict(&mut self, session: &Session, from: &mut Node, to: &mut Node) -> Result<()> {
        if self.save(session, from, to)? {
            return Ok(());
        }
        let mut messages = self.errors.full_messages();
        if messages.is_empty() {
            messages = "save halted by a callback".into();
        }
        Err(OgmError::InvalidRelationship(messages))
    }

    fn update(&mut self, session: &Session) -> Result<bool> {
        self.errors.clear();
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

    fn match_query(&self) -> CypherQuery {
        let fragment = self.entity.to_fragment(IDENT);
        let (pattern, predicates) = match fragment.kind() {
            FragmentKind::Match { pattern, predicate } => (pattern.clone(), vec![predicate.clone()]),
            FragmentKind::Create { pattern } => (pattern.clone(), Vec::new()),
        };
        CypherQuery {
            clauses: vec![Clause::Match {
                optional: false,
                patterns: vec![pattern],
                predicates,
            }],
            params: fragment.params().clone(),
        }
    }

    /// Runs destroy callbacks around `DELETE`. Returns false when a
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
            detach: false,
            idents: vec![IDENT.into()],
        });
        session.execute(&query)?;
        self.destroyed = true;
        debug!(rel_type = %self.model.rel_type(), id = self.id(), "Relationship destroyed");
        Ok(hooks.run_after_destroy(&self.entity))
    }
}
