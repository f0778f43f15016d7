//! Match-or-create fragments derived from a single entity.
//!
//! Persisted entities always match, unpersisted ones always create. Parameter
//! keys are namespaced by the identifier the fragment is bound to, so several
//! fragments can be merged into one query without collisions.

use crate::entity::{EntityKind, EntityRef, Identity};
use crate::query::ast::{Direction, NodePattern, Pattern, Predicate, RelPattern};
use crate::value::{Params, Value};

/// What the fragment contributes to a query.
#[derive(Clone, Debug, PartialEq)]
pub enum FragmentKind {
    /// `MATCH pattern WHERE predicate`
    Match {
        /// Pattern binding the identifier.
        pattern: Pattern,
        /// Identity condition.
        predicate: Predicate,
    },
    /// `CREATE pattern`
    Create {
        /// Pattern carrying labels (or type) and the property parameter.
        pattern: Pattern,
    },
}

/// Clause text plus uniquely keyed parameters for one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryFragment {
    identifier: String,
    kind: FragmentKind,
    params: Params,
}

impl QueryFragment {
    /// Identifier the entity is bound to.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Structured content.
    pub fn kind(&self) -> &FragmentKind {
        &self.kind
    }

    /// True for match fragments.
    pub fn is_match(&self) -> bool {
        matches!(self.kind, FragmentKind::Match { .. })
    }

    /// `(ident)` for persisted entities.
    pub fn match_clause(&self) -> Option<String> {
        match &self.kind {
            FragmentKind::Match { pattern, .. } => Some(pattern.to_string()),
            FragmentKind::Create { .. } => None,
        }
    }

    /// Identity condition for persisted entities.
    pub fn where_clause(&self) -> Option<String> {
        match &self.kind {
            FragmentKind::Match { predicate, .. } => Some(predicate.to_string()),
            FragmentKind::Create { .. } => None,
        }
    }

    /// `(ident:Label $props)` for unpersisted entities.
    pub fn create_clause(&self) -> Option<String> {
        match &self.kind {
            FragmentKind::Create { pattern } => Some(pattern.to_string()),
            FragmentKind::Match { .. } => None,
        }
    }

    /// The pattern, whichever kind.
    pub fn pattern(&self) -> &Pattern {
        match &self.kind {
            FragmentKind::Match { pattern, .. } | FragmentKind::Create { pattern } => pattern,
        }
    }

    /// The identity condition of a match fragment.
    pub fn predicate(&self) -> Option<&Predicate> {
        match &self.kind {
            FragmentKind::Match { predicate, .. } => Some(predicate),
            FragmentKind::Create { .. } => None,
        }
    }

    /// Parameters referenced by the fragment.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Rebinds the anonymous endpoints of a relationship fragment.
    pub fn between(mut self, from: &str, to: &str) -> Self {
        let pattern = match &mut self.kind {
            FragmentKind::Match { pattern, .. } | FragmentKind::Create { pattern } => pattern,
        };
        pattern.start = NodePattern::bound(from);
        if let Some((_, end)) = &mut pattern.hop {
            *end = NodePattern::bound(to);
        }
        self
    }
}

/// Turns an entity's persistence state into a [`QueryFragment`].
pub struct FragmentBuilder;

impl FragmentBuilder {
    /// Pure and deterministic in `(persisted, identity, labels, properties,
    /// identifier)`.
    pub fn build(entity: &EntityRef, identifier: &str) -> QueryFragment {
        let mut params = Params::new();
        let kind = if entity.stored() {
            let predicate = identity_predicate(&entity.identity(), identifier, &mut params);
            let pattern = match entity.kind() {
                EntityKind::Node => Pattern::node(NodePattern::bound(identifier)),
                EntityKind::Relationship => anonymous_hop(identifier, None),
            };
            FragmentKind::Match { pattern, predicate }
        } else {
            let props_key = format!("{identifier}_props");
            params.insert(props_key.clone(), Value::Map(entity.properties().clone()));
            let pattern = match entity.kind() {
                EntityKind::Node => Pattern::node(NodePattern {
                    ident: identifier.to_owned(),
                    labels: entity.labels_or_type().to_vec(),
                    props: Some(props_key),
                }),
                EntityKind::Relationship => {
                    anonymous_hop(identifier, entity.labels_or_type().first().cloned())
                }
            };
            FragmentKind::Create { pattern }
        };
        QueryFragment {
            identifier: identifier.to_owned(),
            kind,
            params,
        }
    }
}

fn anonymous_hop(identifier: &str, rel_type: Option<String>) -> Pattern {
    Pattern::path(
        NodePattern::anonymous(),
        RelPattern {
            ident: identifier.to_owned(),
            rel_type,
            direction: Direction::Out,
        },
        NodePattern::anonymous(),
    )
}

fn identity_predicate(identity: &Identity, identifier: &str, params: &mut Params) -> Predicate {
    match identity {
        Identity::PrimaryKey { key, value } => {
            let param = format!("{identifier}_{key}");
            params.insert(param.clone(), value.clone());
            Predicate::PropEq {
                ident: identifier.to_owned(),
                key: key.clone(),
                param,
            }
        }
        Identity::Internal(id) => {
            let param = format!("{identifier}_id");
            params.insert(param.clone(), Value::from(*id));
            Predicate::IdEq {
                ident: identifier.to_owned(),
                param,
            }
        }
        // Persisted entities always carry an identity; an unassigned one can
        // never match anything.
        Identity::Unassigned => Predicate::Never,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use crate::value::NodeValue;
    use proptest::prelude::*;

    fn student(props: crate::Props) -> EntityRef {
        EntityRef::new_node(vec!["Student".into(), "Person".into()], props, None)
    }

    #[test]
    fn unpersisted_node_creates_with_namespaced_props() {
        let fragment = FragmentBuilder::build(&student(props! { "name" => "Jimmy" }), "n1");
        assert_eq!(
            fragment.create_clause().as_deref(),
            Some("(n1:`Student`:`Person` $n1_props)")
        );
        assert_eq!(fragment.match_clause(), None);
        assert_eq!(
            fragment.params().get("n1_props"),
            Some(&Value::Map(props! { "name" => "Jimmy" }))
        );
    }

    #[test]
    fn persisted_node_matches_on_internal_id() {
        let entity = EntityRef::loaded_node(
            &NodeValue {
                id: 7,
                labels: vec!["Student".into()],
                properties: props! {},
            },
            None,
        );
        let fragment = FragmentBuilder::build(&entity, "n2");
        assert_eq!(fragment.match_clause().as_deref(), Some("(n2)"));
        assert_eq!(fragment.where_clause().as_deref(), Some("ID(n2) = $n2_id"));
        assert_eq!(fragment.params().get("n2_id"), Some(&Value::Int(7)));
        assert_eq!(fragment.params().len(), 1);
    }

    #[test]
    fn persisted_node_matches_on_primary_key() {
        let entity = EntityRef::loaded_node(
            &NodeValue {
                id: 3,
                labels: vec!["Lesson".into()],
                properties: props! { "uuid" => "abc" },
            },
            Some("uuid".into()),
        );
        let fragment = FragmentBuilder::build(&entity, "n2");
        assert_eq!(fragment.where_clause().as_deref(), Some("n2.uuid = $n2_uuid"));
        assert_eq!(fragment.params().get("n2_uuid"), Some(&Value::from("abc")));
    }

    #[test]
    fn relationship_fragment_rebinds_endpoints() {
        let rel = EntityRef::new_relationship("lessons", props! { "absence_count" => 0 });
        let fragment = FragmentBuilder::build(&rel, "r").between("n1", "n2");
        assert_eq!(
            fragment.create_clause().as_deref(),
            Some("(n1)-[r:`lessons`]->(n2)")
        );
    }

    proptest! {
        #[test]
        fn persistence_flag_decides_clause(
            persisted in any::<bool>(),
            id in 0u64..10_000,
            ident in "[a-z][a-z0-9_]{0,8}",
            name in "[a-z]{0,8}",
        ) {
            let entity = if persisted {
                EntityRef::loaded_node(
                    &NodeValue { id, labels: vec!["Student".into()], properties: props! { "name" => name } },
                    None,
                )
            } else {
                student(props! { "name" => name })
            };
            let fragment = FragmentBuilder::build(&entity, &ident);
            prop_assert_eq!(fragment.create_clause().is_some(), !persisted);
            prop_assert_eq!(fragment.match_clause().is_some(), persisted);
            prop_assert!(fragment.params().iter().all(|(key, _)| key.starts_with(ident.as_str())));
            prop_assert_eq!(FragmentBuilder::build(&entity, &ident), fragment);
        }
    }
}
