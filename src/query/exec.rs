//! Terminal operations: everything that sends a chain to the engine.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::engine::Row;
use crate::entity::{Node, Relationship};
use crate::error::{OgmError, Result};
use crate::query::ast::{CypherQuery, ReturnItem};
use crate::query::chain::{Anchor, BulkOp, Chain, CountMode, Filter, MatchTarget, Records, Step, Update};
use crate::query::render::Output;
use crate::value::{Params, Props, Value};

impl Chain {
    /// Query that materializes the chain.
    pub fn to_query(&self) -> Result<CypherQuery> {
        self.render(self.rows_output())
    }

    /// Text of [`to_query`](Chain::to_query).
    pub fn to_cypher(&self) -> Result<String> {
        Ok(self.to_query()?.to_cypher())
    }

    fn rows_output(&self) -> Output {
        let mut items = vec![ReturnItem::Ident(self.identity.clone())];
        if let Some(rel) = &self.rel_identity {
            items.push(ReturnItem::Ident(rel.clone()));
        }
        Output::Rows {
            items,
            distinct: false,
        }
    }

    /// Runs the chain once and caches the rows. Entity-anchored chains are
    /// served from the anchor's association cache when a preload filled it.
    pub(crate) fn materialize(&self) -> Result<Arc<Records>> {
        if let Some(records) = self.cached_records() {
            self.session.record_cache_hit();
            return Ok(records);
        }
        let query = self.to_query()?;
        if let Anchor::Entity { node, .. } = &self.anchor {
            if let Some(hit) = node.association_cache().get(&query.cache_key()) {
                debug!(ident = %self.identity, "Association cache hit");
                self.session.record_cache_hit();
                let records = Arc::new(hit.records().to_vec());
                self.store_records(records.clone());
                return Ok(records);
            }
        }
        let rows = self.session.execute(&query)?;
        let records = Arc::new(self.records_from(&rows, &self.identity, self.rel_identity.as_deref())?);
        self.store_records(records.clone());
        Ok(records)
    }

    pub(crate) fn records_from(&self, rows: &[Row], ident: &str, rel_ident: Option<&str>) -> Result<Records> {
        let model = self.model_of(ident);
        let rel_model = rel_ident.and_then(|r| self.rel_model_of(r));
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(value) = row.get(ident).and_then(Value::as_node) else {
                continue;
            };
            let node = Node::load(&self.session, value, model.as_ref())?;
            let rel = rel_ident
                .and_then(|r| row.get(r))
                .and_then(Value::as_relationship)
                .map(|value| Relationship::load(&self.session, value, rel_model.as_ref()));
            records.push((node, rel));
        }
        Ok(records)
    }

    fn execute_count(&self, output: Output) -> Result<u64> {
        let rows = self.session.execute(&self.render(output)?)?;
        Ok(count_of(&rows))
    }

    /// Every terminal node, one per row.
    pub fn to_a(&self) -> Result<Vec<Node>> {
        Ok(self.materialize()?.iter().map(|(node, _)| node.clone()).collect())
    }

    /// Terminal nodes paired with the relationship that reached them.
    pub fn each_with_rel(&self) -> Result<Vec<(Node, Relationship)>> {
        if self.rel_identity.is_none() {
            return Err(OgmError::invalid_argument(
                "each_with_rel needs an association in the chain",
            ));
        }
        Ok(self
            .materialize()?
            .iter()
            .filter_map(|(node, rel)| rel.clone().map(|rel| (node.clone(), rel)))
            .collect())
    }

    /// First row, fetched with `LIMIT 1` unless the rows are cached.
    pub fn first(&self) -> Result<Option<Node>> {
        if let Some(records) = self.cached_records() {
            self.session.record_cache_hit();
            return Ok(records.first().map(|(node, _)| node.clone()));
        }
        let limited = match self.limit_value() {
            Some(limit) if limit <= 1 => self.fresh(),
            _ => self.derive(Step::LimitSkip {
                limit: Some(1),
                skip: None,
            }),
        };
        Ok(limited.to_a()?.into_iter().next())
    }

    /// Last row of the materialized chain.
    pub fn last(&self) -> Result<Option<Node>> {
        Ok(self.materialize()?.last().map(|(node, _)| node.clone()))
    }

    /// Projects columns: identifiers (`"l"`) or properties (`"l.name"`).
    pub fn pluck(&self, columns: &[&str], distinct: bool) -> Result<Vec<Vec<Value>>> {
        let items: Vec<ReturnItem> = columns
            .iter()
            .map(|column| match column.split_once('.') {
                Some((ident, key)) => ReturnItem::Prop {
                    ident: ident.to_owned(),
                    key: key.to_owned(),
                },
                None => ReturnItem::Ident((*column).to_owned()),
            })
            .collect();
        let query = self.render(Output::Rows {
            items: items.clone(),
            distinct,
        })?;
        let rows = self.session.execute(&query)?;
        Ok(rows
            .iter()
            .map(|row| {
                items
                    .iter()
                    .map(|item| row.get(&item.column()).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect())
    }

    /// Rows matched by the chain. Always asks the engine unless the rows are
    /// already materialized.
    pub fn count(&self) -> Result<u64> {
        self.count_with(None, None)
    }

    /// `count(distinct?, target?)`: `mode` must be `"distinct"` when given;
    /// `target` counts another bound identifier.
    pub fn count_with(&self, mode: Option<&str>, target: Option<&str>) -> Result<u64> {
        let mode = mode.map(str::parse::<CountMode>).transpose()?.unwrap_or(CountMode::All);
        let distinct = mode == CountMode::Distinct;
        let ident = target.unwrap_or(self.identity.as_str());
        if ident == self.identity {
            if let Some(records) = self.cached_records() {
                self.session.record_cache_hit();
                return Ok(count_records(&records, distinct));
            }
        }
        self.execute_count(Output::Aggregate(vec![ReturnItem::Count {
            ident: ident.to_owned(),
            distinct,
        }]))
    }

    /// Like `count`, but remembers its answer for the life of this chain.
    pub fn size(&self) -> Result<u64> {
        if let Some(records) = self.cached_records() {
            self.session.record_cache_hit();
            return Ok(records.len() as u64);
        }
        if let Some(size) = *self.size.read() {
            self.session.record_cache_hit();
            return Ok(size);
        }
        let size = self.count()?;
        *self.size.write() = Some(size);
        Ok(size)
    }

    /// Materializes the chain and counts the rows.
    pub fn length(&self) -> Result<u64> {
        Ok(self.materialize()?.len() as u64)
    }

    /// Whether anything matches; `arg` narrows by internal id (integer) or
    /// properties (map).
    pub fn exists(&self, arg: Option<Value>) -> Result<bool> {
        let chain = match arg {
            None => {
                if let Some(records) = self.cached_records() {
                    self.session.record_cache_hit();
                    return Ok(!records.is_empty());
                }
                self.fresh()
            }
            Some(Value::Int(id)) => match u64::try_from(id) {
                Ok(id) => self.filtered(Filter::Id(id)),
                Err(_) => self.filtered(Filter::Never),
            },
            Some(Value::Map(props)) => self.filtered(Filter::Props(props)),
            Some(other) => {
                return Err(OgmError::invalid_parameter(format!(
                    "exists expects an id or a property map, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(chain.count()? > 0)
    }

    /// No row matches.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.exists(None)?)
    }

    /// Same as [`is_empty`](Chain::is_empty).
    pub fn is_blank(&self) -> Result<bool> {
        self.is_empty()
    }

    /// Whether `candidate` is among the nodes bound to `target` (default: the
    /// terminal identifier).
    pub fn include(&self, candidate: impl Into<MatchTarget>, target: Option<&str>) -> Result<bool> {
        let ident = target.unwrap_or(self.identity.as_str()).to_owned();
        let chain = self.match_ident(&ident, candidate.into())?;
        Ok(chain.count_with(None, Some(&ident))? > 0)
    }

    fn filtered(&self, filter: Filter) -> Chain {
        self.derive(Step::Filter {
            ident: self.identity.clone(),
            filter,
        })
    }

    /// Deletes the nodes (detaching them) or relationships bound to `target`
    /// without running callbacks.
    pub fn delete_all(&self, target: Option<&str>) -> Result<()> {
        let ident = target.unwrap_or(self.identity.as_str()).to_owned();
        let detach = !self.is_rel_ident(&ident);
        let query = self
            .derive(Step::BulkOp(BulkOp::Delete {
                idents: vec![ident],
                detach,
            }))
            .render(Output::Nothing)?;
        self.session.execute(&query)?;
        Ok(())
    }

    /// Loads every entity bound to `target` and destroys it with callbacks.
    /// Returns how many were destroyed.
    pub fn destroy_all(&self, target: Option<&str>) -> Result<usize> {
        let ident = target.unwrap_or(self.identity.as_str()).to_owned();
        let query = self.render(Output::Rows {
            items: vec![ReturnItem::Ident(ident.clone())],
            distinct: true,
        })?;
        let rows = self.session.execute(&query)?;
        let mut destroyed = 0;
        if self.is_rel_ident(&ident) {
            let rel_model = self.rel_model_of(&ident);
            for value in rows.iter().filter_map(|row| row.get(&ident).and_then(Value::as_relationship)) {
                let mut rel = Relationship::load(&self.session, value, rel_model.as_ref());
                if rel.destroy(&self.session)? {
                    destroyed += 1;
                }
            }
        } else {
            for (mut node, _) in self.records_from(&rows, &ident, None)? {
                if node.destroy(&self.session)? {
                    destroyed += 1;
                }
            }
        }
        Ok(destroyed)
    }

    /// `SET` on the terminal node: a property map, or a raw assignment list
    /// with its parameters. Returns the number of rows updated.
    pub fn update_all(&self, update: impl Into<Value>, params: Option<Params>) -> Result<u64> {
        let ident = self.identity.clone();
        self.update_ident(ident, update.into(), params)
    }

    /// Like [`update_all`](Chain::update_all) on the last relationship hop.
    pub fn update_all_rels(&self, update: impl Into<Value>, params: Option<Params>) -> Result<u64> {
        let ident = self.rel_identity.clone().ok_or_else(|| {
            OgmError::invalid_argument("update_all_rels needs an association in the chain")
        })?;
        self.update_ident(ident, update.into(), params)
    }

    fn update_ident(&self, ident: String, update: Value, params: Option<Params>) -> Result<u64> {
        let update = match update {
            Value::Map(props) => Update::Props(props),
            Value::String(expr) => Update::Raw {
                expr,
                params: params.unwrap_or_default(),
            },
            other => {
                return Err(OgmError::invalid_argument(format!(
                    "update_all expects a property map or an assignment string, got {}",
                    other.type_name()
                )))
            }
        };
        self.derive(Step::BulkOp(BulkOp::Set {
            ident: ident.clone(),
            update,
        }))
        .execute_count(Output::Aggregate(vec![ReturnItem::Count {
            ident,
            distinct: false,
        }]))
    }

    /// Returns the first node matching `props`, creating it when none exists.
    /// On a chain one hop off an entity, the node is also connected to that
    /// entity.
    pub fn find_or_create_by(&self, props: Props) -> Result<Node> {
        if let Some(found) = self.r#where(props.clone()).first()? {
            return Ok(found);
        }
        let model = self.model.clone().ok_or_else(|| {
            OgmError::invalid_argument("find_or_create_by needs a chain ending in a model")
        })?;
        self.session.transaction(|session| {
            let existing = Chain::for_model(session.clone(), model.clone(), &session.config().identifier)
                .r#where(props.clone())
                .first()?;
            let mut node = match existing {
                Some(node) => node,
                None => Node::instantiate(session, model.clone(), props.clone()),
            };
            match self.association_origin() {
                Some((anchor, association)) => {
                    let mut anchor = anchor.clone();
                    anchor.connect(session, association, &mut node)?;
                }
                None if !node.stored() => {
                    node.save(session)?;
                }
                None => {}
            }
            Ok(node)
        })
    }

    /// Connects the chain's anchor entity to `other` through the chain's
    /// single association.
    pub fn connect(&self, other: &mut Node) -> Result<bool> {
        let (anchor, association) = self.association_origin().ok_or_else(|| {
            OgmError::invalid_argument("connect needs a chain one association away from an entity")
        })?;
        let mut anchor = anchor.clone();
        anchor.connect(&self.session, association, other)
    }

    fn last_rel_ident(&self, op: &str) -> Result<String> {
        self.rel_identity
            .clone()
            .ok_or_else(|| OgmError::invalid_argument(format!("{op} needs an association in the chain")))
    }

    /// Relationships of the last hop whose far end is `target`.
    pub fn rels_to(&self, target: impl Into<MatchTarget>) -> Result<Vec<Relationship>> {
        let rel_ident = self.last_rel_ident("rels_to")?;
        let chain = self.match_to(target)?;
        let query = chain.render(Output::Rows {
            items: vec![ReturnItem::Ident(rel_ident.clone())],
            distinct: false,
        })?;
        let rel_model = self.rel_model_of(&rel_ident);
        Ok(self
            .session
            .execute(&query)?
            .iter()
            .filter_map(|row| row.get(&rel_ident).and_then(Value::as_relationship))
            .map(|value| Relationship::load(&self.session, value, rel_model.as_ref()))
            .collect())
    }

    /// First of [`rels_to`](Chain::rels_to).
    pub fn first_rel_to(&self, target: impl Into<MatchTarget>) -> Result<Option<Relationship>> {
        Ok(self.rels_to(target)?.into_iter().next())
    }

    /// Deletes the last hop's relationships to `target`; no callbacks run.
    pub fn delete(&self, target: impl Into<MatchTarget>) -> Result<()> {
        let rel_ident = self.last_rel_ident("delete")?;
        let query = self
            .match_to(target)?
            .derive(Step::BulkOp(BulkOp::Delete {
                idents: vec![rel_ident],
                detach: false,
            }))
            .render(Output::Nothing)?;
        self.session.execute(&query)?;
        Ok(())
    }

    /// Destroys the last hop's relationships to `target` with callbacks.
    pub fn destroy(&self, target: impl Into<MatchTarget>) -> Result<usize> {
        let mut destroyed = 0;
        for mut rel in self.rels_to(target)? {
            if rel.destroy(&self.session)? {
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Cache key a preload stores this chain's rows under.
    pub(crate) fn cache_key(&self) -> Result<String> {
        Ok(self.to_query()?.cache_key())
    }
}

fn count_of(rows: &[Row]) -> u64 {
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(Value::as_int)
        .and_then(|count| u64::try_from(count).ok())
        .unwrap_or(0)
}

fn count_records(records: &Records, distinct: bool) -> u64 {
    if !distinct {
        return records.len() as u64;
    }
    records
        .iter()
        .filter_map(|(node, _)| node.id())
        .collect::<BTreeSet<_>>()
        .len() as u64
}
