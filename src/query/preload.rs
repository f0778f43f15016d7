//! Eager loading of one association for every node of a chain.
//!
//! The parent chain is paged first, then extended with an optional
//! traversal, run once, and the child rows are grouped per parent. For each parent the queued filters are
//! replayed on `parent.association(name)` and the grouped rows stored in the
//! parent's association cache under the replayed chain's cache key, so the
//! same call later costs no round trip.

use std::collections::HashMap;

use tracing::debug;

use crate::entity::{CachedAssociation, Node};
use crate::error::{OgmError, Result};
use crate::query::ast::{CypherQuery, ReturnItem};
use crate::query::chain::{Chain, Condition, Records, Step};
use crate::query::render::Output;
use crate::value::Value;

/// Pending eager load created by [`Chain::preload`].
#[derive(Clone, Debug)]
pub struct Preload {
    parent: Chain,
    association: String,
    child_ident: String,
    rel_ident: String,
    queued: Vec<Condition>,
}

impl Chain {
    /// Eager-loads `association` for every node the chain returns.
    pub fn preload(&self, association: &str) -> Result<Preload> {
        let model = self.model.clone();
        // Resolve now so a bad name fails at the call site.
        if let Some(model) = model {
            self.session.schema().resolve(&model, association)?;
        }
        Ok(Preload {
            parent: self.fresh(),
            association: association.to_owned(),
            child_ident: format!("{}{}", self.identity, self.session.config().preload_suffix),
            rel_ident: format!("{}_rel", self.identity),
            queued: Vec::new(),
        })
    }
}

impl Preload {
    /// Queues a filter on the preloaded children; it is applied to the eager
    /// query and replayed when filling each parent's cache.
    ///
    /// Only property conditions are accepted: the eager query and the
    /// replayed association bind the children under different identifiers,
    /// so a raw expression cannot name both.
    pub fn r#where(mut self, condition: impl Into<Condition>) -> Result<Self> {
        let condition = condition.into();
        if let Condition::Raw { expr, .. } = &condition {
            return Err(OgmError::invalid_argument(format!(
                "preload of '{}' accepts property conditions only, got raw '{expr}'",
                self.association
            )));
        }
        self.queued.push(condition);
        Ok(self)
    }

    fn children_chain(&self) -> Result<Chain> {
        // Limits on the parents must not cut into their children.
        let chain = self.parent.derive(Step::PageRows).optional_as(
            &self.association,
            &self.child_ident,
            Some(&self.rel_ident),
        )?;
        Ok(self
            .queued
            .iter()
            .fold(chain, |chain, condition| chain.r#where(condition.clone())))
    }

    /// The single query the preload sends.
    pub fn to_query(&self) -> Result<CypherQuery> {
        self.children_chain()?.render(Output::Rows {
            items: vec![
                ReturnItem::Ident(self.parent.identity.clone()),
                ReturnItem::Ident(self.child_ident.clone()),
                ReturnItem::Ident(self.rel_ident.clone()),
            ],
            distinct: false,
        })
    }

    /// Parents in chain order, each with the association cached.
    pub fn to_a(&self) -> Result<Vec<Node>> {
        let chain = self.children_chain()?;
        let rows = self.parent.session.execute(&self.to_query()?)?;
        let parent_model = self.parent.model.clone();

        let mut parents: Vec<Node> = Vec::new();
        let mut children: HashMap<u64, Records> = HashMap::new();
        for row in &rows {
            let Some(value) = row.get(&self.parent.identity).and_then(Value::as_node) else {
                continue;
            };
            if !children.contains_key(&value.id) {
                parents.push(Node::load(&self.parent.session, value, parent_model.as_ref())?);
                children.insert(value.id, Vec::new());
            }
            let child = chain.records_from(
                std::slice::from_ref(row),
                &self.child_ident,
                Some(&self.rel_ident),
            )?;
            if let Some(group) = children.get_mut(&value.id) {
                group.extend(child);
            }
        }

        for parent in &parents {
            let replay = self.queued.iter().fold(
                parent.association(&self.parent.session, &self.association)?,
                |chain, condition| chain.r#where(condition.clone()),
            );
            let records = parent
                .id()
                .and_then(|id| children.remove(&id))
                .unwrap_or_default();
            debug!(
                parent = parent.id(),
                association = %self.association,
                children = records.len(),
                "Association preloaded"
            );
            parent
                .association_cache()
                .insert(replay.cache_key()?, CachedAssociation::new(records));
        }
        Ok(parents)
    }

    /// Parents paired with their preloaded children.
    pub fn each_with_children(&self) -> Result<Vec<(Node, Vec<Node>)>> {
        let parents = self.to_a()?;
        let mut out = Vec::with_capacity(parents.len());
        for parent in parents {
            let children = self
                .queued
                .iter()
                .fold(
                    parent.association(&self.parent.session, &self.association)?,
                    |chain, condition| chain.r#where(condition.clone()),
                )
                .to_a()?;
            out.push((parent, children));
        }
        Ok(out)
    }
}
