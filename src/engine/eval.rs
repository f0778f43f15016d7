//! Clause-by-clause interpreter used by [`MemoryGraph`](super::MemoryGraph).

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use super::memory::GraphState;
use super::raw::{self, CmpOp, Target};
use super::{EngineError, Row};
use crate::query::ast::{
    Clause, Direction, NodePattern, OrderItem, Paging, Pattern, Predicate, ReturnItem, SetItem,
};
use crate::query::CypherQuery;
use crate::value::{Params, Props, Value};

/// What an identifier is bound to in one row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Slot {
    Null,
    Node(u64),
    Rel(u64),
}

type Binding = BTreeMap<String, Slot>;

type EvalResult<T> = Result<T, EngineError>;

pub(super) fn run(state: &mut GraphState, query: &CypherQuery) -> EvalResult<Vec<Row>> {
    let mut eval = Eval {
        state,
        params: &query.params,
    };
    let mut rows = vec![Binding::new()];
    let last = query.clauses.len().saturating_sub(1);
    for (idx, clause) in query.clauses.iter().enumerate() {
        match clause {
            Clause::Match {
                optional,
                patterns,
                predicates,
            } => rows = eval.match_clause(rows, *optional, patterns, predicates)?,
            Clause::With {
                items,
                distinct,
                paging,
                predicates,
            } => rows = eval.with_clause(rows, items, *distinct, paging, predicates)?,
            Clause::Create { patterns } => eval.create(&mut rows, patterns)?,
            Clause::Merge { pattern } => eval.merge(&mut rows, pattern)?,
            Clause::Set { items } => eval.set(&rows, items)?,
            Clause::Delete { detach, idents } => eval.delete(&rows, *detach, idents)?,
            Clause::Return {
                items,
                distinct,
                paging,
            } => {
                if idx != last {
                    return Err(EngineError::Syntax("RETURN must be the final clause".into()));
                }
                return eval.project(rows, items, *distinct, paging);
            }
        }
    }
    Ok(Vec::new())
}

struct Eval<'a> {
    state: &'a mut GraphState,
    params: &'a Params,
}

impl Eval<'_> {
    fn param(&self, name: &str) -> EvalResult<&Value> {
        self.params
            .get(name)
            .ok_or_else(|| EngineError::Failure(format!("missing parameter '{name}'")))
    }

    fn slot(binding: &Binding, ident: &str) -> EvalResult<Slot> {
        binding
            .get(ident)
            .copied()
            .ok_or_else(|| EngineError::Syntax(format!("variable `{ident}` not defined")))
    }

    fn props_of(&self, slot: Slot) -> Option<&Props> {
        match slot {
            Slot::Node(id) => self.state.nodes.get(&id).map(|node| &node.props),
            Slot::Rel(id) => self.state.rels.get(&id).map(|rel| &rel.props),
            Slot::Null => None,
        }
    }

    fn prop(&self, binding: &Binding, ident: &str, key: &str) -> EvalResult<Value> {
        let slot = Self::slot(binding, ident)?;
        Ok(self
            .props_of(slot)
            .and_then(|props| props.get(key))
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn id_of(binding: &Binding, ident: &str) -> EvalResult<Option<u64>> {
        Ok(match Self::slot(binding, ident)? {
            Slot::Node(id) | Slot::Rel(id) => Some(id),
            Slot::Null => None,
        })
    }

    fn slot_value(&self, slot: Slot) -> Value {
        match slot {
            Slot::Node(id) => self.state.node_value(id).map_or(Value::Null, Value::Node),
            Slot::Rel(id) => self
                .state
                .rel_value(id)
                .map_or(Value::Null, Value::Relationship),
            Slot::Null => Value::Null,
        }
    }

    fn match_clause(
        &self,
        rows: Vec<Binding>,
        optional: bool,
        patterns: &[Pattern],
        predicates: &[Predicate],
    ) -> EvalResult<Vec<Binding>> {
        let mut out = Vec::new();
        for row in rows {
            let mut candidates = vec![(row.clone(), BTreeSet::new())];
            for pattern in patterns {
                let mut next = Vec::new();
                for (binding, used) in candidates {
                    next.extend(self.expand(pattern, binding, used)?);
                }
                candidates = next;
            }
            let mut matched = false;
            for (binding, _) in candidates {
                if self.all_hold(&binding, predicates)? {
                    out.push(binding);
                    matched = true;
                }
            }
            if optional && !matched {
                let mut fallback = row;
                for pattern in patterns {
                    for ident in pattern.idents() {
                        fallback.entry(ident.to_owned()).or_insert(Slot::Null);
                    }
                }
                out.push(fallback);
            }
        }
        Ok(out)
    }

    fn expand(
        &self,
        pattern: &Pattern,
        binding: Binding,
        used: BTreeSet<u64>,
    ) -> EvalResult<Vec<(Binding, BTreeSet<u64>)>> {
        let mut out = Vec::new();
        for start in self.node_candidates(&pattern.start, &binding)? {
            let mut bound = binding.clone();
            bind(&mut bound, &pattern.start.ident, Slot::Node(start));
            let Some((rel_pattern, end_pattern)) = &pattern.hop else {
                out.push((bound, used.clone()));
                continue;
            };
            for (rel_id, rel) in &self.state.rels {
                if used.contains(rel_id) {
                    continue;
                }
                if let Some(rel_type) = &rel_pattern.rel_type {
                    if &rel.rel_type != rel_type {
                        continue;
                    }
                }
                let other = match rel_pattern.direction {
                    Direction::Out => (rel.start == start).then_some(rel.end),
                    Direction::In => (rel.end == start).then_some(rel.start),
                    Direction::Both if rel.start == start => Some(rel.end),
                    Direction::Both => (rel.end == start).then_some(rel.start),
                };
                let Some(other) = other else { continue };
                if !rel_pattern.ident.is_empty() {
                    match bound.get(&rel_pattern.ident) {
                        Some(Slot::Rel(id)) if id == rel_id => {}
                        Some(_) => continue,
                        None => {}
                    }
                }
                if !self.node_fits(end_pattern, other, &bound)? {
                    continue;
                }
                let mut hop = bound.clone();
                bind(&mut hop, &rel_pattern.ident, Slot::Rel(*rel_id));
                bind(&mut hop, &end_pattern.ident, Slot::Node(other));
                let mut hop_used = used.clone();
                hop_used.insert(*rel_id);
                out.push((hop, hop_used));
            }
        }
        Ok(out)
    }

    fn node_candidates(&self, pattern: &NodePattern, binding: &Binding) -> EvalResult<Vec<u64>> {
        if !pattern.ident.is_empty() {
            if let Some(slot) = binding.get(&pattern.ident) {
                return Ok(match slot {
                    Slot::Node(id) if self.node_fits(pattern, *id, binding)? => vec![*id],
                    _ => Vec::new(),
                });
            }
        }
        let mut out = Vec::new();
        for id in self.state.nodes.keys() {
            if self.node_fits(pattern, *id, binding)? {
                out.push(*id);
            }
        }
        Ok(out)
    }

    fn node_fits(&self, pattern: &NodePattern, id: u64, binding: &Binding) -> EvalResult<bool> {
        if !pattern.ident.is_empty() {
            match binding.get(&pattern.ident) {
                Some(Slot::Node(bound)) if *bound != id => return Ok(false),
                Some(Slot::Rel(_)) | Some(Slot::Null) => return Ok(false),
                _ => {}
            }
        }
        let Some(node) = self.state.nodes.get(&id) else {
            return Ok(false);
        };
        if !pattern.labels.iter().all(|label| node.labels.contains(label)) {
            return Ok(false);
        }
        if let Some(param) = &pattern.props {
            if let Value::Map(expected) = self.param(param)? {
                let fits = expected
                    .iter()
                    .all(|(key, value)| node.props.get(key).is_some_and(|v| CmpOp::Eq.holds(v, value)));
                return Ok(fits);
            }
        }
        Ok(true)
    }

    fn all_hold(&self, binding: &Binding, predicates: &[Predicate]) -> EvalResult<bool> {
        for predicate in predicates {
            if !self.holds(binding, predicate)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn holds(&self, binding: &Binding, predicate: &Predicate) -> EvalResult<bool> {
        Ok(match predicate {
            Predicate::IdEq { ident, param } => {
                let expected = self.param(param)?.as_int();
                Self::id_of(binding, ident)?.is_some_and(|id| Some(id as i64) == expected)
            }
            Predicate::IdIn { ident, param } => match (Self::id_of(binding, ident)?, self.param(param)?) {
                (Some(id), Value::List(ids)) => ids.iter().any(|v| v.as_int() == Some(id as i64)),
                _ => false,
            },
            Predicate::PropEq { ident, key, param } => {
                CmpOp::Eq.holds(&self.prop(binding, ident, key)?, self.param(param)?)
            }
            Predicate::PropIn { ident, key, param } => {
                let actual = self.prop(binding, ident, key)?;
                match self.param(param)? {
                    Value::List(values) => values.iter().any(|v| CmpOp::Eq.holds(&actual, v)),
                    _ => false,
                }
            }
            Predicate::Never => false,
            Predicate::Raw(expr) => {
                for comparison in raw::parse_conditions(expr)? {
                    let left = match &comparison.target {
                        Target::Prop { ident, key } => self.prop(binding, ident, key)?,
                        Target::Id(ident) => Self::id_of(binding, ident)?.map_or(Value::Null, Value::from),
                    };
                    let right = comparison.operand.resolve(self.params)?;
                    if !comparison.op.holds(&left, &right) {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    fn sort(&self, rows: Vec<Binding>, order: &[OrderItem]) -> EvalResult<Vec<Binding>> {
        if order.is_empty() {
            return Ok(rows);
        }
        let mut keyed = rows
            .into_iter()
            .map(|binding| {
                let keys = order
                    .iter()
                    .map(|item| self.prop(&binding, &item.ident, &item.key))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok((keys, binding))
            })
            .collect::<EvalResult<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| {
            for (idx, item) in order.iter().enumerate() {
                let ordering = sort_order(&a[idx], &b[idx]);
                let ordering = if item.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, binding)| binding).collect())
    }

    fn with_clause(
        &self,
        rows: Vec<Binding>,
        items: &[String],
        distinct: bool,
        paging: &Paging,
        predicates: &[Predicate],
    ) -> EvalResult<Vec<Binding>> {
        let rows = self.sort(rows, &paging.order)?;
        let keep_all = items.iter().any(|item| item == "*");
        let mut projected = Vec::with_capacity(rows.len());
        for row in rows {
            if keep_all {
                projected.push(row);
                continue;
            }
            let mut next = Binding::new();
            for item in items {
                next.insert(item.clone(), Self::slot(&row, item)?);
            }
            projected.push(next);
        }
        if distinct {
            let mut seen = BTreeSet::new();
            projected.retain(|row| seen.insert(row.clone()));
        }
        let projected = page(projected, paging);
        let mut out = Vec::with_capacity(projected.len());
        for row in projected {
            if self.all_hold(&row, predicates)? {
                out.push(row);
            }
        }
        Ok(out)
    }

    fn project(
        &self,
        rows: Vec<Binding>,
        items: &[ReturnItem],
        distinct: bool,
        paging: &Paging,
    ) -> EvalResult<Vec<Row>> {
        let rows = self.sort(rows, &paging.order)?;
        if items.iter().any(ReturnItem::is_aggregate) {
            return self.aggregate(rows, items, paging);
        }
        let mut out: Vec<Row> = Vec::with_capacity(rows.len());
        for binding in &rows {
            let mut row = Row::new();
            for item in items {
                row.insert(item.column(), self.item_value(binding, item)?);
            }
            if distinct && out.contains(&row) {
                continue;
            }
            out.push(row);
        }
        Ok(page(out, paging))
    }

    fn item_value(&self, binding: &Binding, item: &ReturnItem) -> EvalResult<Value> {
        match item {
            ReturnItem::Ident(ident) => Ok(self.slot_value(Self::slot(binding, ident)?)),
            ReturnItem::Prop { ident, key } => self.prop(binding, ident, key),
            ReturnItem::Count { .. } | ReturnItem::Collect { .. } => {
                Err(EngineError::Syntax("aggregate outside grouping".into()))
            }
        }
    }

    fn aggregate(&self, rows: Vec<Binding>, items: &[ReturnItem], paging: &Paging) -> EvalResult<Vec<Row>> {
        let keys: Vec<&ReturnItem> = items.iter().filter(|item| !item.is_aggregate()).collect();
        let mut groups: Vec<(Vec<Value>, Vec<Binding>)> = Vec::new();
        for binding in rows {
            let key = keys
                .iter()
                .map(|item| self.item_value(&binding, item))
                .collect::<EvalResult<Vec<_>>>()?;
            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(binding),
                None => groups.push((key, vec![binding])),
            }
        }
        if groups.is_empty() && keys.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut out = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            let mut row = Row::new();
            let mut key_values = key.into_iter();
            for item in items {
                let value = match item {
                    ReturnItem::Count { ident, distinct } => {
                        let slots = non_null_slots(&members, ident, *distinct)?;
                        Value::Int(slots.len() as i64)
                    }
                    ReturnItem::Collect { ident, distinct } => Value::List(
                        non_null_slots(&members, ident, *distinct)?
                            .into_iter()
                            .map(|slot| self.slot_value(slot))
                            .collect(),
                    ),
                    _ => key_values.next().unwrap_or(Value::Null),
                };
                row.insert(item.column(), value);
            }
            out.push(row);
        }
        Ok(page(out, paging))
    }

    fn create(&mut self, rows: &mut [Binding], patterns: &[Pattern]) -> EvalResult<()> {
        for binding in rows.iter_mut() {
            for pattern in patterns {
                let start = self.create_or_reuse(&pattern.start, binding)?;
                let Some((rel, end)) = &pattern.hop else {
                    continue;
                };
                let end_id = self.create_or_reuse(end, binding)?;
                let rel_type = rel
                    .rel_type
                    .clone()
                    .ok_or_else(|| EngineError::Syntax("CREATE needs a relationship type".into()))?;
                let (from, to) = directed(rel.direction, start, end_id)?;
                let id = self.state.create_rel(rel_type, from, to, Props::new());
                bind(binding, &rel.ident, Slot::Rel(id));
            }
        }
        Ok(())
    }

    fn create_or_reuse(&mut self, pattern: &NodePattern, binding: &mut Binding) -> EvalResult<u64> {
        if !pattern.ident.is_empty() {
            match binding.get(&pattern.ident) {
                Some(Slot::Node(id)) if pattern.labels.is_empty() && pattern.props.is_none() => {
                    return Ok(*id)
                }
                Some(Slot::Node(_)) => {
                    return Err(EngineError::Syntax(format!(
                        "variable `{}` already declared",
                        pattern.ident
                    )))
                }
                Some(_) => {
                    return Err(EngineError::Failure(format!(
                        "cannot create a pattern through null `{}`",
                        pattern.ident
                    )))
                }
                None => {}
            }
        }
        let props = match &pattern.props {
            Some(param) => storable(self.param(param)?)?,
            None => Props::new(),
        };
        let id = self.state.create_node(pattern.labels.clone(), props);
        bind(binding, &pattern.ident, Slot::Node(id));
        Ok(id)
    }

    fn merge(&mut self, rows: &mut [Binding], pattern: &Pattern) -> EvalResult<()> {
        let Some((rel, end)) = &pattern.hop else {
            return Err(EngineError::Syntax("MERGE expects a relationship pattern".into()));
        };
        let rel_type = rel
            .rel_type
            .clone()
            .ok_or_else(|| EngineError::Syntax("MERGE needs a relationship type".into()))?;
        for binding in rows.iter_mut() {
            let endpoint = |ident: &str| match binding.get(ident) {
                Some(Slot::Node(id)) => Ok(*id),
                _ => Err(EngineError::Syntax(format!("MERGE endpoint `{ident}` is not bound"))),
            };
            let start = endpoint(&pattern.start.ident)?;
            let finish = endpoint(&end.ident)?;
            let (from, to) = directed(rel.direction, start, finish)?;
            let existing = self
                .state
                .rels
                .iter()
                .find(|(_, r)| r.rel_type == rel_type && r.start == from && r.end == to)
                .map(|(id, _)| *id);
            let id = match existing {
                Some(id) => id,
                None => self.state.create_rel(rel_type.clone(), from, to, Props::new()),
            };
            bind(binding, &rel.ident, Slot::Rel(id));
        }
        Ok(())
    }

    fn set(&mut self, rows: &[Binding], items: &[SetItem]) -> EvalResult<()> {
        let mut assignments: Vec<(String, Option<String>, Value)> = Vec::new();
        for item in items {
            match item {
                SetItem::Prop { ident, key, param } => {
                    assignments.push((ident.clone(), Some(key.clone()), self.param(param)?.clone()))
                }
                SetItem::Replace { ident, param } => {
                    assignments.push((ident.clone(), None, self.param(param)?.clone()))
                }
                SetItem::Raw(expr) => {
                    for assignment in raw::parse_assignments(expr)? {
                        let value = assignment.operand.resolve(self.params)?;
                        assignments.push((assignment.ident, Some(assignment.key), value));
                    }
                }
            }
        }
        for binding in rows {
            for (ident, key, value) in &assignments {
                let slot = Self::slot(binding, ident)?;
                let Some(props) = self.props_of_mut(slot) else {
                    continue;
                };
                match key {
                    Some(key) if value.is_null() => {
                        props.remove(key);
                    }
                    Some(key) => {
                        props.insert(key.clone(), value.clone());
                    }
                    None => *props = storable(value)?,
                }
            }
        }
        Ok(())
    }

    fn props_of_mut(&mut self, slot: Slot) -> Option<&mut Props> {
        match slot {
            Slot::Node(id) => self.state.nodes.get_mut(&id).map(|node| &mut node.props),
            Slot::Rel(id) => self.state.rels.get_mut(&id).map(|rel| &mut rel.props),
            Slot::Null => None,
        }
    }

    fn delete(&mut self, rows: &[Binding], detach: bool, idents: &[String]) -> EvalResult<()> {
        let mut nodes = BTreeSet::new();
        let mut rels = BTreeSet::new();
        for binding in rows {
            for ident in idents {
                match Self::slot(binding, ident)? {
                    Slot::Node(id) => {
                        nodes.insert(id);
                    }
                    Slot::Rel(id) => {
                        rels.insert(id);
                    }
                    Slot::Null => {}
                }
            }
        }
        for (id, rel) in &self.state.rels {
            if rels.contains(id) {
                continue;
            }
            if nodes.contains(&rel.start) || nodes.contains(&rel.end) {
                if !detach {
                    return Err(EngineError::Constraint(format!(
                        "node still has relationship {id}; use DETACH DELETE"
                    )));
                }
                rels.insert(*id);
            }
        }
        for id in rels {
            self.state.rels.remove(&id);
        }
        for id in nodes {
            self.state.nodes.remove(&id);
        }
        Ok(())
    }
}

fn bind(binding: &mut Binding, ident: &str, slot: Slot) {
    if !ident.is_empty() {
        binding.insert(ident.to_owned(), slot);
    }
}

fn directed(direction: Direction, left: u64, right: u64) -> EvalResult<(u64, u64)> {
    match direction {
        Direction::Out => Ok((left, right)),
        Direction::In => Ok((right, left)),
        Direction::Both => Err(EngineError::Syntax(
            "relationships must be created with a direction".into(),
        )),
    }
}

/// Property maps never store nulls.
fn storable(value: &Value) -> EvalResult<Props> {
    match value {
        Value::Map(map) => Ok(map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()),
        Value::Null => Ok(Props::new()),
        other => Err(EngineError::Failure(format!(
            "expected a property map, got {}",
            other.type_name()
        ))),
    }
}

fn non_null_slots(members: &[Binding], ident: &str, distinct: bool) -> EvalResult<Vec<Slot>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for binding in members {
        let slot = Eval::slot(binding, ident)?;
        if slot == Slot::Null || (distinct && !seen.insert(slot)) {
            continue;
        }
        out.push(slot);
    }
    Ok(out)
}

/// Ascending order with nulls last.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp_value(b).unwrap_or(Ordering::Equal),
    }
}

fn page<T>(rows: Vec<T>, paging: &Paging) -> Vec<T> {
    let skip = paging.skip.unwrap_or(0) as usize;
    let limit = paging.limit.map_or(usize::MAX, |limit| limit as usize);
    rows.into_iter().skip(skip).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use crate::query::ast::RelPattern;

    fn seeded() -> GraphState {
        let mut state = GraphState::default();
        let jimmy = state.create_node(vec!["Student".into()], props! { "name" => "Jimmy" });
        let math = state.create_node(vec!["Lesson".into()], props! { "name" => "math" });
        let science = state.create_node(vec!["Lesson".into()], props! { "name" => "science" });
        state.create_rel("lessons".into(), jimmy, math, props! {});
        state.create_rel("lessons".into(), jimmy, science, props! {});
        state.create_rel("lessons".into(), jimmy, science, props! {});
        state
    }

    fn lessons_of_jimmy(extra: Vec<Clause>) -> CypherQuery {
        let mut clauses = vec![Clause::Match {
            optional: false,
            patterns: vec![Pattern::path(
                NodePattern::labeled("s", vec!["Student".into()]),
                RelPattern {
                    ident: "r".into(),
                    rel_type: Some("lessons".into()),
                    direction: Direction::Out,
                },
                NodePattern::labeled("l", vec!["Lesson".into()]),
            )],
            predicates: vec![Predicate::Raw("s.name = \"Jimmy\"".into())],
        }];
        clauses.extend(extra);
        CypherQuery {
            clauses,
            params: Params::new(),
        }
    }

    #[test]
    fn counts_paths_and_distinct_nodes() {
        let mut state = seeded();
        let query = lessons_of_jimmy(vec![Clause::Return {
            items: vec![
                ReturnItem::Count {
                    ident: "l".into(),
                    distinct: false,
                },
                ReturnItem::Collect {
                    ident: "l".into(),
                    distinct: true,
                },
            ],
            distinct: false,
            paging: Paging::default(),
        }]);
        let rows = run(&mut state, &query).expect("run");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("count"), Some(&Value::Int(3)));
        assert!(matches!(rows[0].get("l"), Some(Value::List(items)) if items.len() == 2));
    }

    #[test]
    fn orders_and_pages_returned_rows() {
        let mut state = seeded();
        let query = lessons_of_jimmy(vec![Clause::Return {
            items: vec![ReturnItem::Prop {
                ident: "l".into(),
                key: "name".into(),
            }],
            distinct: true,
            paging: Paging {
                order: vec![OrderItem {
                    ident: "l".into(),
                    key: "name".into(),
                    descending: true,
                }],
                skip: None,
                limit: Some(1),
            },
        }]);
        let rows = run(&mut state, &query).expect("run");
        assert_eq!(rows, vec![Row::from([("l.name".to_owned(), Value::from("science"))])]);
    }

    #[test]
    fn optional_match_keeps_row_with_null() {
        let mut state = seeded();
        let query = CypherQuery {
            clauses: vec![
                Clause::Match {
                    optional: false,
                    patterns: vec![Pattern::node(NodePattern::labeled("l", vec!["Lesson".into()]))],
                    predicates: vec![],
                },
                Clause::Match {
                    optional: true,
                    patterns: vec![Pattern::path(
                        NodePattern::bound("l"),
                        RelPattern {
                            ident: String::new(),
                            rel_type: Some("teaches".into()),
                            direction: Direction::In,
                        },
                        NodePattern::bound("t"),
                    )],
                    predicates: vec![],
                },
                Clause::Return {
                    items: vec![ReturnItem::Ident("l".into()), ReturnItem::Ident("t".into())],
                    distinct: false,
                    paging: Paging::default(),
                },
            ],
            params: Params::new(),
        };
        let rows = run(&mut state, &query).expect("run");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.get("t") == Some(&Value::Null)));
    }

    #[test]
    fn delete_without_detach_rejects_connected_node() {
        let mut state = seeded();
        let query = lessons_of_jimmy(vec![Clause::Delete {
            detach: false,
            idents: vec!["s".into()],
        }]);
        assert!(matches!(run(&mut state, &query), Err(EngineError::Constraint(_))));
        let detach = lessons_of_jimmy(vec![Clause::Delete {
            detach: true,
            idents: vec!["s".into()],
        }]);
        run(&mut state, &detach).expect("detach delete");
        assert_eq!(state.nodes.len(), 2);
        assert!(state.rels.is_empty());
    }

    #[test]
    fn raw_set_uses_braced_params() {
        let mut state = seeded();
        let mut query = lessons_of_jimmy(vec![Clause::Set {
            items: vec![SetItem::Raw("r.absence_count = {count}".into())],
        }]);
        query.params.insert("count", Value::Int(3));
        run(&mut state, &query).expect("set");
        assert!(state
            .rels
            .values()
            .all(|rel| rel.props.get("absence_count") == Some(&Value::Int(3))));
    }
}
