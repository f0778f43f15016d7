//! Turns a [`Chain`] into a [`CypherQuery`].
//!
//! Filters land in the `WHERE` of the most recent `MATCH` when that is legal
//! (always for a plain match, only for identifiers it binds when optional),
//! otherwise in a `WITH * WHERE`. Ordering and paging gather on the final
//! `RETURN`, or on a `WITH *` in front of aggregates, bulk writes and
//! traversals that must not be paged with the rows they add.

use crate::error::Result;
use crate::query::ast::{
    Clause, CypherQuery, NodePattern, Paging, Pattern, Predicate, RelPattern, ReturnItem, SetItem,
};
use crate::query::chain::{Anchor, BulkOp, Chain, Filter, Step, Traversal, Update};
use crate::value::{Params, Value};

/// What the rendered query returns.
#[derive(Clone, Debug)]
pub(crate) enum Output {
    /// Row projection; paging applies to it directly.
    Rows { items: Vec<ReturnItem>, distinct: bool },
    /// Aggregation over the (paged) rows.
    Aggregate(Vec<ReturnItem>),
    /// No `RETURN` clause.
    Nothing,
}

impl Chain {
    pub(crate) fn render(&self, output: Output) -> Result<CypherQuery> {
        let mut renderer = Renderer::default();
        renderer.anchor(&self.anchor);
        renderer.steps(&self.steps);
        Ok(renderer.finish(output))
    }
}

#[derive(Default)]
struct Renderer {
    clauses: Vec<Clause>,
    params: Params,
    paging: Paging,
    bulk: Vec<BulkOp>,
}

impl Renderer {
    fn anchor(&mut self, anchor: &Anchor) {
        match anchor {
            Anchor::Model { ident, model } => self.clauses.push(Clause::Match {
                optional: false,
                patterns: vec![Pattern::node(NodePattern::labeled(
                    ident.as_str(),
                    model.labels().to_vec(),
                ))],
                predicates: Vec::new(),
            }),
            Anchor::Entity { ident, node } => {
                let fragment = node.entity().to_fragment(ident);
                let predicate = match fragment.predicate() {
                    Some(predicate) => {
                        self.params.merge(fragment.params().clone());
                        predicate.clone()
                    }
                    // Unsaved anchors have nothing to traverse from.
                    None => Predicate::Never,
                };
                self.clauses.push(Clause::Match {
                    optional: false,
                    patterns: vec![Pattern::node(NodePattern::bound(ident.as_str()))],
                    predicates: vec![predicate],
                });
            }
        }
    }

    fn steps(&mut self, steps: &[Step]) {
        for step in steps {
            match step {
                Step::Filter { ident, filter } => {
                    let predicates = self.filter(ident, filter);
                    self.attach(ident, predicates);
                }
                Step::Association(traversal) => self.traversal(traversal, false),
                Step::Optional(traversal) => self.traversal(traversal, true),
                Step::Branch(sub) => self.steps(sub),
                Step::Order(item) => self.paging.order.push(item.clone()),
                Step::LimitSkip { limit, skip } => {
                    if limit.is_some() {
                        self.paging.limit = *limit;
                    }
                    if skip.is_some() {
                        self.paging.skip = *skip;
                    }
                }
                Step::PageRows => self.page_rows(),
                Step::BulkOp(op) => self.bulk.push(op.clone()),
            }
        }
    }

    /// `WITH * ORDER BY .. SKIP .. LIMIT ..` over the rows bound so far. The
    /// ordering stays pending so the final `RETURN` keeps it.
    fn page_rows(&mut self) {
        if self.paging.limit.is_none() && self.paging.skip.is_none() {
            return;
        }
        let order = self.paging.order.clone();
        let paging = std::mem::take(&mut self.paging);
        self.paging.order = order;
        self.clauses.push(Clause::With {
            items: vec!["*".into()],
            distinct: false,
            paging,
            predicates: Vec::new(),
        });
    }

    fn traversal(&mut self, traversal: &Traversal, optional: bool) {
        let end = match &traversal.target {
            Some(model) => NodePattern::labeled(traversal.ident.as_str(), model.labels().to_vec()),
            None => NodePattern::bound(traversal.ident.as_str()),
        };
        let rel = RelPattern {
            ident: traversal.rel_ident.clone(),
            rel_type: traversal.rel_type.clone(),
            direction: traversal.direction,
        };
        self.clauses.push(Clause::Match {
            optional,
            patterns: vec![Pattern::path(
                NodePattern::bound(traversal.from.as_str()),
                rel,
                end,
            )],
            predicates: Vec::new(),
        });
    }

    fn filter(&mut self, ident: &str, filter: &Filter) -> Vec<Predicate> {
        match filter {
            Filter::Props(props) => props
                .iter()
                .map(|(key, value)| {
                    let param = self.params.insert_unique(&format!("{ident}_{key}"), value.clone());
                    prop_predicate(ident, key, param, value)
                })
                .collect(),
            Filter::Raw { expr, params } => {
                self.params.merge(params.clone());
                vec![Predicate::Raw(expr.clone())]
            }
            Filter::Id(id) => {
                let param = self
                    .params
                    .insert_unique(&format!("{ident}_id"), Value::from(*id));
                vec![Predicate::IdEq {
                    ident: ident.to_owned(),
                    param,
                }]
            }
            Filter::Ids(ids) => {
                let list = Value::List(ids.iter().copied().map(Value::from).collect());
                let param = self.params.insert_unique(&format!("{ident}_ids"), list);
                vec![Predicate::IdIn {
                    ident: ident.to_owned(),
                    param,
                }]
            }
            Filter::Key { key, value } => {
                let param = self
                    .params
                    .insert_unique(&format!("{ident}_{key}"), value.clone());
                vec![Predicate::PropEq {
                    ident: ident.to_owned(),
                    key: key.clone(),
                    param,
                }]
            }
            Filter::Keys { key, values } => {
                let param = self
                    .params
                    .insert_unique(&format!("{ident}_{key}"), Value::List(values.clone()));
                vec![Predicate::PropIn {
                    ident: ident.to_owned(),
                    key: key.clone(),
                    param,
                }]
            }
            Filter::Never => vec![Predicate::Never],
        }
    }

    fn attach(&mut self, ident: &str, predicates: Vec<Predicate>) {
        if predicates.is_empty() {
            return;
        }
        match self.clauses.last_mut() {
            Some(Clause::Match {
                optional: false,
                predicates: existing,
                ..
            }) => existing.extend(predicates),
            Some(Clause::Match {
                optional: true,
                patterns,
                predicates: existing,
            }) if patterns.iter().any(|p| p.idents().contains(&ident)) => {
                existing.extend(predicates)
            }
            Some(Clause::With {
                items,
                paging,
                predicates: existing,
                ..
            }) if is_star(items) && paging.is_empty() => existing.extend(predicates),
            _ => self.clauses.push(Clause::With {
                items: vec!["*".into()],
                distinct: false,
                paging: Paging::default(),
                predicates,
            }),
        }
    }

    fn bulk_clause(&mut self, op: BulkOp) {
        match op {
            BulkOp::Delete { idents, detach } => self.clauses.push(Clause::Delete { detach, idents }),
            BulkOp::Set { ident, update } => {
                let items = match update {
                    Update::Props(props) => props
                        .into_iter()
                        .map(|(key, value)| {
                            let param = self.params.insert_unique(&format!("{ident}_{key}"), value);
                            SetItem::Prop {
                                ident: ident.clone(),
                                key,
                                param,
                            }
                        })
                        .collect::<Vec<_>>(),
                    Update::Raw { expr, params } => {
                        self.params.merge(params);
                        vec![SetItem::Raw(expr)]
                    }
                };
                if !items.is_empty() {
                    self.clauses.push(Clause::Set { items });
                }
            }
        }
    }

    fn finish(mut self, output: Output) -> CypherQuery {
        let mut paging = std::mem::take(&mut self.paging);
        let pre_page = !paging.is_empty()
            && (!self.bulk.is_empty() || !matches!(output, Output::Rows { .. }));
        if pre_page {
            self.clauses.push(Clause::With {
                items: vec!["*".into()],
                distinct: false,
                paging: std::mem::take(&mut paging),
                predicates: Vec::new(),
            });
        }
        for op in std::mem::take(&mut self.bulk) {
            self.bulk_clause(op);
        }
        match output {
            Output::Rows { items, distinct } => self.clauses.push(Clause::Return {
                items,
                distinct,
                paging,
            }),
            Output::Aggregate(items) => self.clauses.push(Clause::Return {
                items,
                distinct: false,
                paging: Paging::default(),
            }),
            Output::Nothing => {}
        }
        CypherQuery {
            clauses: self.clauses,
            params: self.params,
        }
    }
}

fn prop_predicate(ident: &str, key: &str, param: String, value: &Value) -> Predicate {
    match value {
        Value::List(_) => Predicate::PropIn {
            ident: ident.to_owned(),
            key: key.to_owned(),
            param,
        },
        _ => Predicate::PropEq {
            ident: ident.to_owned(),
            key: key.to_owned(),
            param,
        },
    }
}

fn is_star(items: &[String]) -> bool {
    items.len() == 1 && items[0] == "*"
}
