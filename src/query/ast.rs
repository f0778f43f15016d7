//! Structured form of the Cypher subset the chain renders.
//!
//! A [`CypherQuery`] keeps its clauses structured so it can be rendered to
//! text for a remote engine or interpreted directly by
//! [`MemoryGraph`](crate::engine::MemoryGraph).

use std::fmt;

use crate::value::Params;

/// Direction selector for relationship traversals.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Direction {
    /// `(a)-[r]->(b)`
    #[default]
    Out,
    /// `(a)<-[r]-(b)`
    In,
    /// `(a)-[r]-(b)`
    Both,
}

/// `(ident:Label {props})`. An empty identifier renders as `()`.
#[derive(Clone, Debug, PartialEq)]
pub struct NodePattern {
    /// Binding name.
    pub ident: String,
    /// Label filter (create: labels to assign).
    pub labels: Vec<String>,
    /// Parameter holding the property map, for create patterns.
    pub props: Option<String>,
}

impl NodePattern {
    /// Bare `(ident)`.
    pub fn bound(ident: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            labels: Vec::new(),
            props: None,
        }
    }

    /// `(ident:Label...)`.
    pub fn labeled(ident: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            ident: ident.into(),
            labels,
            props: None,
        }
    }

    /// Anonymous `()`.
    pub fn anonymous() -> Self {
        Self::bound("")
    }
}

/// `-[ident:TYPE]->` segment.
#[derive(Clone, Debug, PartialEq)]
pub struct RelPattern {
    /// Binding name; empty for an anonymous relationship.
    pub ident: String,
    /// Type filter (create: type to assign).
    pub rel_type: Option<String>,
    /// Traversal direction relative to the left node.
    pub direction: Direction,
}

/// A node pattern, optionally followed by a single hop.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    /// Left node.
    pub start: NodePattern,
    /// Relationship and right node.
    pub hop: Option<(RelPattern, NodePattern)>,
}

impl Pattern {
    /// Single node pattern.
    pub fn node(node: NodePattern) -> Self {
        Self {
            start: node,
            hop: None,
        }
    }

    /// One-hop path pattern.
    pub fn path(start: NodePattern, rel: RelPattern, end: NodePattern) -> Self {
        Self {
            start,
            hop: Some((rel, end)),
        }
    }

    /// Identifiers this pattern binds.
    pub fn idents(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(3);
        if !self.start.ident.is_empty() {
            out.push(self.start.ident.as_str());
        }
        if let Some((rel, end)) = &self.hop {
            if !rel.ident.is_empty() {
                out.push(rel.ident.as_str());
            }
            if !end.ident.is_empty() {
                out.push(end.ident.as_str());
            }
        }
        out
    }
}

/// Boolean condition evaluated against one row.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `ID(ident) = $param`
    IdEq {
        /// Node or relationship binding.
        ident: String,
        /// Parameter holding the id.
        param: String,
    },
    /// `ID(ident) IN $param`
    IdIn {
        /// Node or relationship binding.
        ident: String,
        /// Parameter holding the id list.
        param: String,
    },
    /// `ident.key = $param`
    PropEq {
        /// Node or relationship binding.
        ident: String,
        /// Property name.
        key: String,
        /// Parameter holding the expected value.
        param: String,
    },
    /// `ident.key IN $param`
    PropIn {
        /// Node or relationship binding.
        ident: String,
        /// Property name.
        key: String,
        /// Parameter holding the value list.
        param: String,
    },
    /// `1 = 2`; never satisfied.
    Never,
    /// Caller-supplied expression, rendered verbatim.
    Raw(String),
}

/// `ident.key [DESC]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderItem {
    /// Binding to sort on.
    pub ident: String,
    /// Property to sort by.
    pub key: String,
    /// Sort descending.
    pub descending: bool,
}

/// Ordering and paging attached to `WITH` or `RETURN`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Paging {
    /// Sort keys, most significant first.
    pub order: Vec<OrderItem>,
    /// Rows to drop.
    pub skip: Option<u64>,
    /// Maximum rows to keep.
    pub limit: Option<u64>,
}

impl Paging {
    /// True when neither ordering nor paging is requested.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty() && self.skip.is_none() && self.limit.is_none()
    }
}

/// Item of a `RETURN` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnItem {
    /// A binding, column named after it.
    Ident(String),
    /// `ident.key`, column named `ident.key`.
    Prop {
        /// Binding.
        ident: String,
        /// Property.
        key: String,
    },
    /// `count([DISTINCT] ident) AS count`.
    Count {
        /// Counted binding.
        ident: String,
        /// Count distinct bindings only.
        distinct: bool,
    },
    /// `collect([DISTINCT] ident) AS ident`.
    Collect {
        /// Collected binding.
        ident: String,
        /// Drop duplicates.
        distinct: bool,
    },
}

impl ReturnItem {
    /// Column name under which the item appears in result rows.
    pub fn column(&self) -> String {
        match self {
            ReturnItem::Ident(ident) | ReturnItem::Collect { ident, .. } => ident.clone(),
            ReturnItem::Prop { ident, key } => format!("{ident}.{key}"),
            ReturnItem::Count { .. } => "count".into(),
        }
    }

    /// Whether the item aggregates over rows.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, ReturnItem::Count { .. } | ReturnItem::Collect { .. })
    }
}

/// Item of a `SET` clause.
#[derive(Clone, Debug, PartialEq)]
pub enum SetItem {
    /// `ident.key = $param`
    Prop {
        /// Binding to update.
        ident: String,
        /// Property to assign.
        key: String,
        /// Parameter holding the value.
        param: String,
    },
    /// `ident = $param`; replaces the whole property map.
    Replace {
        /// Binding to update.
        ident: String,
        /// Parameter holding the map.
        param: String,
    },
    /// Caller-supplied assignment list, rendered verbatim.
    Raw(String),
}

/// One clause of a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    /// `[OPTIONAL] MATCH patterns [WHERE ...]`
    Match {
        /// Renders as `OPTIONAL MATCH` and keeps unmatched rows with nulls.
        optional: bool,
        /// Comma-joined patterns.
        patterns: Vec<Pattern>,
        /// ANDed conditions.
        predicates: Vec<Predicate>,
    },
    /// `WITH items [ORDER BY ...] [SKIP] [LIMIT] [WHERE ...]`
    With {
        /// Projected bindings; `*` keeps every binding.
        items: Vec<String>,
        /// Drop duplicate rows.
        distinct: bool,
        /// Ordering and paging.
        paging: Paging,
        /// ANDed conditions applied to the projected rows.
        predicates: Vec<Predicate>,
    },
    /// `CREATE patterns`
    Create {
        /// Patterns to create; already bound identifiers are reused.
        patterns: Vec<Pattern>,
    },
    /// `MERGE pattern`; matches the relationship between bound endpoints or
    /// creates it.
    Merge {
        /// Single-hop pattern between bound endpoints.
        pattern: Pattern,
    },
    /// `SET items`
    Set {
        /// Assignments.
        items: Vec<SetItem>,
    },
    /// `[DETACH] DELETE idents`
    Delete {
        /// Remove attached relationships of deleted nodes.
        detach: bool,
        /// Bindings to delete.
        idents: Vec<String>,
    },
    /// `RETURN [DISTINCT] items [ORDER BY ...] [SKIP] [LIMIT]`
    Return {
        /// Output columns.
        items: Vec<ReturnItem>,
        /// Drop duplicate rows.
        distinct: bool,
        /// Ordering and paging.
        paging: Paging,
    },
}

impl Clause {
    /// Whether executing the clause modifies the graph.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Clause::Create { .. } | Clause::Merge { .. } | Clause::Set { .. } | Clause::Delete { .. }
        )
    }
}

/// A complete query: clauses plus the merged parameter map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CypherQuery {
    /// Clauses in execution order.
    pub clauses: Vec<Clause>,
    /// Parameters referenced by the clauses.
    pub params: Params,
}

impl CypherQuery {
    /// Renders the query text.
    pub fn to_cypher(&self) -> String {
        self.to_string()
    }

    /// Text plus parameters, stable across renders of the same chain.
    pub fn cache_key(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{} {}", self.to_cypher(), params)
    }

    /// Whether any clause writes.
    pub fn is_write(&self) -> bool {
        self.clauses.iter().any(Clause::is_write)
    }
}

fn write_labels(f: &mut fmt::Formatter<'_>, labels: &[String]) -> fmt::Result {
    for label in labels {
        write!(f, ":`{label}`")?;
    }
    Ok(())
}

impl fmt::Display for NodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.ident)?;
        write_labels(f, &self.labels)?;
        if let Some(props) = &self.props {
            write!(f, " ${props}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)?;
        if let Some((rel, end)) = &self.hop {
            let (left, right) = match rel.direction {
                Direction::Out => ("-", "->"),
                Direction::In => ("<-", "-"),
                Direction::Both => ("-", "-"),
            };
            write!(f, "{left}[{}", rel.ident)?;
            if let Some(rel_type) = &rel.rel_type {
                write!(f, ":`{rel_type}`")?;
            }
            write!(f, "]{right}{end}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::IdEq { ident, param } => write!(f, "ID({ident}) = ${param}"),
            Predicate::IdIn { ident, param } => write!(f, "ID({ident}) IN ${param}"),
            Predicate::PropEq { ident, key, param } => write!(f, "{ident}.{key} = ${param}"),
            Predicate::PropIn { ident, key, param } => write!(f, "{ident}.{key} IN ${param}"),
            Predicate::Never => write!(f, "1 = 2"),
            Predicate::Raw(expr) => write!(f, "{expr}"),
        }
    }
}

impl fmt::Display for ReturnItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let distinct = |d: &bool| if *d { "DISTINCT " } else { "" };
        match self {
            ReturnItem::Ident(ident) => write!(f, "{ident}"),
            ReturnItem::Prop { ident, key } => write!(f, "{ident}.{key}"),
            ReturnItem::Count { ident, distinct: d } => {
                write!(f, "count({}{ident}) AS count", distinct(d))
            }
            ReturnItem::Collect { ident, distinct: d } => {
                write!(f, "collect({}{ident}) AS {ident}", distinct(d))
            }
        }
    }
}

impl fmt::Display for SetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetItem::Prop { ident, key, param } => write!(f, "{ident}.{key} = ${param}"),
            SetItem::Replace { ident, param } => write!(f, "{ident} = ${param}"),
            SetItem::Raw(expr) => write!(f, "{expr}"),
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_where(f: &mut fmt::Formatter<'_>, predicates: &[Predicate]) -> fmt::Result {
    if predicates.is_empty() {
        return Ok(());
    }
    write!(f, " WHERE ")?;
    for (idx, predicate) in predicates.iter().enumerate() {
        if idx > 0 {
            write!(f, " AND ")?;
        }
        write!(f, "({predicate})")?;
    }
    Ok(())
}

impl fmt::Display for Paging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.order.is_empty() {
            write!(f, " ORDER BY ")?;
            for (idx, item) in self.order.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}.{}", item.ident, item.key)?;
                if item.descending {
                    write!(f, " DESC")?;
                }
            }
        }
        if let Some(skip) = self.skip {
            write!(f, " SKIP {skip}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Match {
                optional,
                patterns,
                predicates,
            } => {
                if *optional {
                    write!(f, "OPTIONAL ")?;
                }
                write!(f, "MATCH ")?;
                write_joined(f, patterns, ", ")?;
                write_where(f, predicates)
            }
            Clause::With {
                items,
                distinct,
                paging,
                predicates,
            } => {
                write!(f, "WITH ")?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                write!(f, "{}{paging}", items.join(", "))?;
                write_where(f, predicates)
            }
            Clause::Create { patterns } => {
                write!(f, "CREATE ")?;
                write_joined(f, patterns, ", ")
            }
            Clause::Merge { pattern } => write!(f, "MERGE {pattern}"),
            Clause::Set { items } => {
                write!(f, "SET ")?;
                write_joined(f, items, ", ")
            }
            Clause::Delete { detach, idents } => {
                if *detach {
                    write!(f, "DETACH ")?;
                }
                write!(f, "DELETE {}", idents.join(", "))
            }
            Clause::Return {
                items,
                distinct,
                paging,
            } => {
                write!(f, "RETURN ")?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                write_joined(f, items, ", ")?;
                write!(f, "{paging}")
            }
        }
    }
}

impl fmt::Display for CypherQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_joined(f, &self.clauses, " ")
    }
}
