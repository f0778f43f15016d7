//! Model declarations: labels, associations and relationship classes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity::Hooks;
use crate::error::{OgmError, Result};
use crate::query::Direction;
use crate::value::Props;

/// How an association finds its relationship type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssociationRel {
    /// Fixed type.
    Type(String),
    /// Any type.
    Any,
    /// Type of the named association on the target model.
    Origin(String),
    /// Type declared by the named relationship model.
    Class(String),
}

/// `has_many` declaration on a node model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Association {
    name: String,
    direction: Direction,
    target: Option<String>,
    rel: AssociationRel,
}

impl Association {
    /// Association to any model over any relationship type.
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            target: None,
            rel: AssociationRel::Any,
        }
    }

    /// Restricts the far end to a model.
    pub fn target(mut self, model: impl Into<String>) -> Self {
        self.target = Some(model.into());
        self
    }

    /// Fixed relationship type.
    pub fn rel_type(mut self, rel_type: impl Into<String>) -> Self {
        self.rel = AssociationRel::Type(rel_type.into());
        self
    }

    /// Relationship type borrowed from the target model's association.
    pub fn origin(mut self, association: impl Into<String>) -> Self {
        self.rel = AssociationRel::Origin(association.into());
        self
    }

    /// Relationship model backing this association.
    pub fn rel_class(mut self, model: impl Into<String>) -> Self {
        self.rel = AssociationRel::Class(model.into());
        self
    }

    /// Association name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Traversal direction from the owning model.
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// A node class: labels, optional primary key, associations and hooks.
#[derive(Clone, Debug)]
pub struct NodeModel {
    name: String,
    labels: Vec<String>,
    primary_key: Option<String>,
    associations: BTreeMap<String, Association>,
    hooks: Hooks,
}

impl NodeModel {
    /// Model labelled with its own name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            labels: vec![name.clone()],
            name,
            primary_key: None,
            associations: BTreeMap::new(),
            hooks: Hooks::default(),
        }
    }

    /// Adds an extra label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Declares a primary key property, generated on instantiation.
    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    /// Declares an association.
    pub fn has_many(mut self, association: Association) -> Self {
        self.associations
            .insert(association.name.clone(), association);
        self
    }

    /// Installs validators and callbacks.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped labels; the first one is the model's own label.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Primary key property, if declared.
    pub fn primary_key_name(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// Validators and callbacks.
    pub fn lifecycle(&self) -> &Hooks {
        &self.hooks
    }

    /// Looks up an association by name.
    pub fn association(&self, name: &str) -> Result<&Association> {
        self.associations
            .get(name)
            .ok_or_else(|| OgmError::UnknownAssociation {
                model: self.name.clone(),
                association: name.to_owned(),
            })
    }

    /// Snake-cased model name, used for anchor identifiers.
    pub fn snake_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 4);
        for (idx, ch) in self.name.chars().enumerate() {
            if ch.is_uppercase() {
                if idx > 0 {
                    out.push('_');
                }
                out.extend(ch.to_lowercase());
            } else if ch.is_alphanumeric() {
                out.push(ch);
            } else {
                out.push('_');
            }
        }
        out
    }
}

/// Endpoint restriction on a relationship model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassConstraint {
    /// No restriction.
    Any,
    /// Endpoint labels must include this model's label.
    Model(String),
}

/// A relationship class.
#[derive(Clone, Debug)]
pub struct RelModel {
    name: String,
    rel_type: String,
    from: ClassConstraint,
    to: ClassConstraint,
    unique: bool,
    defaults: Props,
    hooks: Hooks,
}

impl RelModel {
    /// Relationship model named `name` creating `rel_type` relationships.
    pub fn new(name: impl Into<String>, rel_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rel_type: rel_type.into(),
            from: ClassConstraint::Any,
            to: ClassConstraint::Any,
            unique: false,
            defaults: Props::new(),
            hooks: Hooks::default(),
        }
    }

    /// Unrestricted model for associations without a relationship class.
    pub fn anonymous(rel_type: impl Into<String>) -> Self {
        let rel_type = rel_type.into();
        Self::new(rel_type.clone(), rel_type)
    }

    /// Restricts the start node.
    pub fn from_class(mut self, model: impl Into<String>) -> Self {
        self.from = ClassConstraint::Model(model.into());
        self
    }

    /// Restricts the end node.
    pub fn to_class(mut self, model: impl Into<String>) -> Self {
        self.to = ClassConstraint::Model(model.into());
        self
    }

    /// Create-unique instead of plain create.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Default property value applied to new relationships.
    pub fn default_value(mut self, key: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Installs validators and callbacks.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relationship type.
    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    /// Start node restriction.
    pub fn from_constraint(&self) -> &ClassConstraint {
        &self.from
    }

    /// End node restriction.
    pub fn to_constraint(&self) -> &ClassConstraint {
        &self.to
    }

    /// Whether saves merge instead of create.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Default properties.
    pub fn defaults(&self) -> &Props {
        &self.defaults
    }

    /// Validators and callbacks.
    pub fn lifecycle(&self) -> &Hooks {
        &self.hooks
    }
}

/// An association with every name resolved against the schema.
#[derive(Clone, Debug)]
pub struct ResolvedAssociation {
    /// Association name.
    pub name: String,
    /// Traversal direction.
    pub direction: Direction,
    /// Relationship type filter; `None` matches any type.
    pub rel_type: Option<String>,
    /// Far-end model; `None` matches any node.
    pub target: Option<Arc<NodeModel>>,
    /// Relationship model, when declared.
    pub rel_model: Option<Arc<RelModel>>,
}

/// Registry of node and relationship models.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    nodes: BTreeMap<String, Arc<NodeModel>>,
    rels: BTreeMap<String, Arc<RelModel>>,
}

impl Schema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node model.
    pub fn node(mut self, model: NodeModel) -> Self {
        self.nodes.insert(model.name.clone(), Arc::new(model));
        self
    }

    /// Registers a relationship model.
    pub fn rel(mut self, model: RelModel) -> Self {
        self.rels.insert(model.name.clone(), Arc::new(model));
        self
    }

    /// Node model by name.
    pub fn node_model(&self, name: &str) -> Result<Arc<NodeModel>> {
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| OgmError::UnknownModel(name.to_owned()))
    }

    /// Relationship model by name.
    pub fn rel_model(&self, name: &str) -> Result<Arc<RelModel>> {
        self.rels
            .get(name)
            .cloned()
            .ok_or_else(|| OgmError::UnknownModel(name.to_owned()))
    }

    /// The model whose own label is carried by `labels`.
    pub fn model_for_labels(&self, labels: &[String]) -> Option<Arc<NodeModel>> {
        self.nodes
            .values()
            .find(|model| labels.iter().any(|label| label == &model.labels[0]))
            .cloned()
    }

    /// The relationship model creating `rel_type` relationships.
    pub fn rel_model_for_type(&self, rel_type: &str) -> Option<Arc<RelModel>> {
        self.rels
            .values()
            .find(|model| model.rel_type == rel_type)
            .cloned()
    }

    /// Resolves target model and relationship type of `model.name`.
    pub fn resolve(&self, model: &NodeModel, name: &str) -> Result<ResolvedAssociation> {
        let association = model.association(name)?;
        let target = association
            .target
            .as_deref()
            .map(|target| self.node_model(target))
            .transpose()?;
        let (rel_type, rel_model) = match &association.rel {
            AssociationRel::Type(rel_type) => (Some(rel_type.clone()), None),
            AssociationRel::Any => (None, None),
            AssociationRel::Class(class) => {
                let rel_model = self.rel_model(class)?;
                (Some(rel_model.rel_type.clone()), Some(rel_model))
            }
            AssociationRel::Origin(origin) => {
                let target = target.as_ref().ok_or_else(|| {
                    OgmError::invalid_argument(format!(
                        "association '{name}' uses origin '{origin}' without a target model"
                    ))
                })?;
                let resolved = self.resolve(target, origin)?;
                (resolved.rel_type, resolved.rel_model)
            }
        };
        Ok(ResolvedAssociation {
            name: association.name.clone(),
            direction: association.direction,
            rel_type,
            target,
            rel_model,
        })
    }
}
