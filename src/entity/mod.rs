//! Entity layer: persistence state of nodes and relationships.

mod hooks;
mod node;
mod relationship;

pub use hooks::{Callback, Hooks, Validator};
pub use node::{AssociationCache, CachedAssociation, Node};
pub use relationship::Relationship;

use crate::query::{FragmentBuilder, QueryFragment};
use crate::session::{TxOutcome, TxTicket};
use crate::value::{NodeValue, Props, RelValue, Value};

/// Whether an [`EntityRef`] describes a node or a relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// A graph node.
    Node,
    /// A typed relationship.
    Relationship,
}

/// How a persisted entity is located.
#[derive(Clone, Debug, PartialEq)]
pub enum Identity {
    /// Engine-internal id.
    Internal(u64),
    /// Declared primary key property and its value.
    PrimaryKey {
        /// Property name.
        key: String,
        /// Property value.
        value: Value,
    },
    /// Not yet stored.
    Unassigned,
}

/// Persistence view of one node or relationship.
///
/// `persisted` flips from false to true once, when the outermost transaction
/// that stored the entity commits, and never reverts. Until then the entity
/// is only [`stored`](EntityRef::stored); a rollback returns it to unsaved.
#[derive(Clone, Debug)]
pub struct EntityRef {
    kind: EntityKind,
    persisted: bool,
    pending: Option<TxTicket>,
    id: Option<u64>,
    primary_key: Option<String>,
    labels: Vec<String>,
    properties: Props,
}

impl EntityRef {
    /// Unsaved node.
    pub fn new_node(labels: Vec<String>, properties: Props, primary_key: Option<String>) -> Self {
        Self {
            kind: EntityKind::Node,
            persisted: false,
            pending: None,
            id: None,
            primary_key,
            labels,
            properties,
        }
    }

    /// Unsaved relationship of the given type.
    pub fn new_relationship(rel_type: impl Into<String>, properties: Props) -> Self {
        Self {
            kind: EntityKind::Relationship,
            persisted: false,
            pending: None,
            id: None,
            primary_key: None,
            labels: vec![rel_type.into()],
            properties,
        }
    }

    /// Node loaded from a result row.
    pub fn loaded_node(value: &NodeValue, primary_key: Option<String>) -> Self {
        Self {
            kind: EntityKind::Node,
            persisted: true,
            pending: None,
            id: Some(value.id),
            primary_key,
            labels: value.labels.clone(),
            properties: value.properties.clone(),
        }
    }

    /// Relationship loaded from a result row.
    pub fn loaded_relationship(value: &RelValue) -> Self {
        Self {
            kind: EntityKind::Relationship,
            persisted: true,
            pending: None,
            id: Some(value.id),
            primary_key: None,
            labels: vec![value.rel_type.clone()],
            properties: value.properties.clone(),
        }
    }

    /// Node or relationship.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Whether the write that stored the entity has committed.
    pub fn persisted(&self) -> bool {
        match &self.pending {
            Some(ticket) => ticket.outcome() == TxOutcome::Committed,
            None => self.persisted,
        }
    }

    /// Whether the entity is in the graph as seen from inside the transaction
    /// that wrote it. Queries match stored entities instead of creating them.
    pub fn stored(&self) -> bool {
        match &self.pending {
            Some(ticket) => ticket.outcome() != TxOutcome::RolledBack,
            None => self.persisted,
        }
    }

    /// Engine-internal id once stored.
    pub fn id(&self) -> Option<u64> {
        self.id.filter(|_| self.stored())
    }

    /// Declared primary key property, if any.
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// The primary key when declared and set, else the internal id.
    pub fn identity(&self) -> Identity {
        if let Some(key) = &self.primary_key {
            if let Some(value) = self.properties.get(key).filter(|v| !v.is_null()) {
                return Identity::PrimaryKey {
                    key: key.clone(),
                    value: value.clone(),
                };
            }
        }
        match self.id() {
            Some(id) => Identity::Internal(id),
            None => Identity::Unassigned,
        }
    }

    /// Labels of a node, or the single type of a relationship.
    pub fn labels_or_type(&self) -> &[String] {
        &self.labels
    }

    /// Current property map.
    pub fn properties(&self) -> &Props {
        &self.properties
    }

    /// Reads one property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Writes one property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Match-or-create fragment bound to `identifier`.
    pub fn to_fragment(&self, identifier: &str) -> QueryFragment {
        FragmentBuilder::build(self, identifier)
    }

    /// Records the id assigned by a write inside `ticket`'s transaction.
    pub(crate) fn mark_stored(&mut self, id: u64, ticket: &TxTicket) {
        if self.stored() {
            return;
        }
        self.pending = Some(ticket.clone());
        self.id = Some(id);
    }

    pub(crate) fn reload(&mut self, properties: Props) {
        self.properties = properties;
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.persisted() == other.persisted()
            && self.id() == other.id()
            && self.primary_key == other.primary_key
            && self.labels == other.labels
            && self.properties == other.properties
    }
}

/// A validation message attached to a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Field (or pseudo-field such as `node`) the message is about.
    pub field: String,
    /// Human readable message.
    pub message: String,
}

/// Validation failures collected during a save.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Errors(Vec<ValidationError>);

impl Errors {
    /// Records a failure.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// No failures recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failures.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Drops every recorded failure.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Messages recorded for one field.
    pub fn on(&self, field: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    /// All failures in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// `field message; field message`.
    pub fn full_messages(&self) -> String {
        self.0
            .iter()
            .map(|e| format!("{} {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;

    #[test]
    fn identity_prefers_primary_key() {
        let mut entity = EntityRef::new_node(vec!["Lesson".into()], props! {}, Some("uuid".into()));
        assert_eq!(entity.identity(), Identity::Unassigned);
        entity.mark_stored(4, &TxTicket::new());
        assert_eq!(entity.identity(), Identity::Internal(4));
        entity.set("uuid", "k-1");
        assert_eq!(
            entity.identity(),
            Identity::PrimaryKey {
                key: "uuid".into(),
                value: Value::from("k-1")
            }
        );
    }

    #[test]
    fn persisted_flag_flips_once() {
        let ticket = TxTicket::new();
        let mut entity = EntityRef::new_relationship("lessons", props! {});
        entity.mark_stored(9, &ticket);
        entity.mark_stored(12, &ticket);
        assert!(entity.stored() && !entity.persisted());
        ticket.settle(TxOutcome::Committed);
        assert!(entity.persisted());
        assert_eq!(entity.id(), Some(9));
    }

    #[test]
    fn rollback_returns_entity_to_unsaved() {
        let ticket = TxTicket::new();
        let mut entity = EntityRef::new_node(vec!["Student".into()], props! {}, None);
        entity.mark_stored(3, &ticket);
        ticket.settle(TxOutcome::RolledBack);
        assert!(!entity.stored() && !entity.persisted());
        assert_eq!(entity.id(), None);
        assert_eq!(entity.identity(), Identity::Unassigned);

        let retry = TxTicket::new();
        entity.mark_stored(5, &retry);
        retry.settle(TxOutcome::Committed);
        assert_eq!(entity.id(), Some(5));
    }
}
