//! Planning and execution of relationship saves.
//!
//! A relationship save may have to create one or both endpoints as well. The
//! planner checks endpoint classes and validation up front, lays the work out
//! as a [`TransactionPlan`] and sends it as one combined query inside a
//! transaction scope, so a halting after-create callback rolls the write
//! back. Persisted flags flip only when the outermost scope commits.

use tracing::{debug, warn};

use crate::engine::EngineError;
use crate::entity::{EntityRef, Node, Relationship};
use crate::error::{OgmError, Result, Side};
use crate::query::ast::{Clause, CypherQuery, Paging, ReturnItem, SetItem};
use crate::query::{FragmentKind, QueryFragment};
use crate::schema::ClassConstraint;
use crate::session::{Session, TxTicket};
use crate::value::{NodeValue, Params, RelValue, Value};

const FROM: &str = "n1";
const TO: &str = "n2";
const REL: &str = "r";

/// Where a relationship save currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    /// Nothing checked yet.
    New,
    /// Checking endpoint classes and running validators.
    Validating,
    /// An endpoint does not satisfy the relationship's class constraint.
    ClassMismatch,
    /// Validation or a callback halted the save.
    Invalid,
    /// Building the transaction plan.
    PlanningCreation,
    /// Running endpoint before-create callbacks.
    CreatingEndpoints,
    /// Sending the combined creation query.
    CreatingRelationship,
    /// Relationship and endpoints are stored.
    Persisted,
}

/// One unit of work in a relationship save.
#[derive(Clone, Debug, PartialEq)]
pub enum CreationStep {
    /// Create the unsaved endpoint on this side.
    CreateEndpoint(Side),
    /// Create the relationship itself.
    CreateRelationship(QueryFragment),
}

/// A step and how deeply it nests inside the steps before it.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedStep {
    /// 0 for the outermost step.
    pub depth: usize,
    /// The work to do.
    pub step: CreationStep,
}

/// Ordered steps of a relationship save; the relationship is always last.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionPlan {
    steps: Vec<PlannedStep>,
}

impl TransactionPlan {
    /// Steps in execution order.
    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    /// Whether an endpoint is created along with the relationship.
    pub fn creates_endpoints(&self) -> bool {
        self.steps
            .iter()
            .any(|planned| matches!(planned.step, CreationStep::CreateEndpoint(_)))
    }
}

struct Created {
    from: NodeValue,
    to: NodeValue,
    rel: RelValue,
}

/// Drives one relationship save through [`SaveState`].
pub struct RelationshipTxPlanner<'a> {
    session: &'a Session,
    rel: &'a mut Relationship,
    from: &'a mut Node,
    to: &'a mut Node,
    state: SaveState,
}

impl<'a> RelationshipTxPlanner<'a> {
    /// Planner for saving `rel` from `from` to `to`.
    pub fn new(session: &'a Session, rel: &'a mut Relationship, from: &'a mut Node, to: &'a mut Node) -> Self {
        Self {
            session,
            rel,
            from,
            to,
            state: SaveState::New,
        }
    }

    /// Current state.
    pub fn state(&self) -> SaveState {
        self.state
    }

    fn transition(&mut self, next: SaveState) {
        debug!(
            rel_type = %self.rel.rel_type(),
            from = ?self.state,
            to = ?next,
            "Relationship save transition"
        );
        self.state = next;
    }

    /// Runs the save. `Ok(false)` means validation or a callback halted and
    /// nothing was written.
    pub fn save(mut self) -> Result<bool> {
        self.transition(SaveState::Validating);
        if let Err(err) = self.check_classes() {
            self.transition(SaveState::ClassMismatch);
            return Err(err);
        }
        if !self.validate() {
            self.transition(SaveState::Invalid);
            return Ok(false);
        }

        self.transition(SaveState::PlanningCreation);
        let plan = self.plan();
        debug!(
            rel_type = %self.rel.rel_type(),
            steps = plan.steps().len(),
            creates_endpoints = plan.creates_endpoints(),
            "Relationship save planned"
        );
        let session = self.session;
        let scope = session.begin_scope()?;

        match self.execute(&plan) {
            Ok(Some(created)) => {
                self.finish(&created, scope.ticket());
                scope.commit()?;
                Ok(true)
            }
            Ok(None) => {
                scope.abort()?;
                self.transition(SaveState::Invalid);
                Ok(false)
            }
            Err(err) => {
                warn!(rel_type = %self.rel.rel_type(), error = %err, "Relationship save failed");
                scope.abort()?;
                Err(err)
            }
        }
    }

    fn check_classes(&self) -> Result<()> {
        self.check_class(Side::From, self.rel.model().from_constraint(), &*self.from)?;
        self.check_class(Side::To, self.rel.model().to_constraint(), &*self.to)
    }

    fn check_class(&self, side: Side, constraint: &ClassConstraint, node: &Node) -> Result<()> {
        let ClassConstraint::Model(model) = constraint else {
            return Ok(());
        };
        let expected = self
            .session
            .schema()
            .node_model(model)
            .ok()
            .and_then(|model| model.labels().first().cloned())
            .unwrap_or_else(|| model.clone());
        let found = node.entity().labels_or_type();
        if found.iter().any(|label| label == &expected) {
            return Ok(());
        }
        Err(OgmError::ClassMismatch {
            side,
            expected,
            found: found.to_vec(),
        })
    }

    fn validate(&mut self) -> bool {
        self.rel.errors_mut().clear();
        let model = self.rel.model().clone();
        let entity = self.rel.entity().clone();
        let mut valid = model.lifecycle().is_valid(&entity, self.rel.errors_mut());
        for side in [Side::From, Side::To] {
            let node = match side {
                Side::From => &mut *self.from,
                Side::To => &mut *self.to,
            };
            if node.stored() {
                continue;
            }
            node.errors_mut().clear();
            let node_model = node.model().clone();
            let node_entity = node.entity().clone();
            if !node_model.lifecycle().is_valid(&node_entity, node.errors_mut()) {
                self.rel
                    .errors_mut()
                    .add(format!("{side}_node"), "failed validation");
                valid = false;
            }
        }
        valid
    }

    /// Steps for the current endpoints: unsaved endpoints first, from before
    /// to, then the relationship nested innermost.
    pub fn plan(&self) -> TransactionPlan {
        let mut steps = Vec::new();
        for (side, node) in [(Side::From, &*self.from), (Side::To, &*self.to)] {
            if !node.stored() {
                steps.push(PlannedStep {
                    depth: steps.len(),
                    step: CreationStep::CreateEndpoint(side),
                });
            }
        }
        let fragment = self.rel.entity().to_fragment(REL).between(FROM, TO);
        steps.push(PlannedStep {
            depth: steps.len(),
            step: CreationStep::CreateRelationship(fragment),
        });
        TransactionPlan { steps }
    }

    fn endpoint(&mut self, side: Side) -> &mut Node {
        match side {
            Side::From => &mut *self.from,
            Side::To => &mut *self.to,
        }
    }

    /// Before-callbacks outermost first, the write, then after-callbacks
    /// innermost first. `None` when a callback halted.
    fn execute(&mut self, plan: &TransactionPlan) -> Result<Option<Created>> {
        let mut created = None;
        for planned in plan.steps() {
            match &planned.step {
                CreationStep::CreateEndpoint(side) => {
                    if self.state != SaveState::CreatingEndpoints {
                        self.transition(SaveState::CreatingEndpoints);
                    }
                    let node = self.endpoint(*side);
                    let model = node.model().clone();
                    let entity = node.entity().clone();
                    if !model.lifecycle().before_create_passes(&entity, node.errors_mut()) {
                        debug!(side = %side, depth = planned.depth, "Endpoint creation halted");
                        return Ok(None);
                    }
                }
                CreationStep::CreateRelationship(fragment) => {
                    self.transition(SaveState::CreatingRelationship);
                    let model = self.rel.model().clone();
                    let entity = self.rel.entity().clone();
                    if !model.lifecycle().before_create_passes(&entity, self.rel.errors_mut()) {
                        return Ok(None);
                    }
                    let rows = self.session.execute(&self.combined_query(fragment))?;
                    created = Some(parse_created(rows.first())?);
                }
            }
        }
        let Some(created) = created else {
            return Ok(None);
        };

        for planned in plan.steps().iter().rev() {
            let completed = match &planned.step {
                CreationStep::CreateEndpoint(side) => {
                    let (node, value) = match side {
                        Side::From => (&*self.from, &created.from),
                        Side::To => (&*self.to, &created.to),
                    };
                    let loaded = EntityRef::loaded_node(value, node.entity().primary_key().map(str::to_owned));
                    node.model().lifecycle().run_after_create(&loaded)
                }
                CreationStep::CreateRelationship(_) => self
                    .rel
                    .model()
                    .lifecycle()
                    .run_after_create(&EntityRef::loaded_relationship(&created.rel)),
            };
            if !completed {
                return Ok(None);
            }
        }
        Ok(Some(created))
    }

    /// `MATCH` persisted endpoints, `CREATE` unsaved ones, create (or merge)
    /// the relationship, then assign its properties.
    fn combined_query(&self, rel: &QueryFragment) -> CypherQuery {
        let mut params = Params::new();
        let mut matched = Vec::new();
        let mut predicates = Vec::new();
        let mut creates = Vec::new();
        for fragment in [self.from.entity().to_fragment(FROM), self.to.entity().to_fragment(TO)] {
            params.merge(fragment.params().clone());
            match fragment.kind() {
                FragmentKind::Match { pattern, predicate } => {
                    matched.push(pattern.clone());
                    predicates.push(predicate.clone());
                }
                FragmentKind::Create { pattern } => creates.push(pattern.clone()),
            }
        }
        params.merge(rel.params().clone());

        let mut clauses = Vec::new();
        if !matched.is_empty() {
            clauses.push(Clause::Match {
                optional: false,
                patterns: matched,
                predicates,
            });
        }
        if !creates.is_empty() {
            clauses.push(Clause::Create { patterns: creates });
        }
        let pattern = rel.pattern().clone();
        clauses.push(if self.rel.model().is_unique() {
            Clause::Merge { pattern }
        } else {
            Clause::Create {
                patterns: vec![pattern],
            }
        });
        let idents = [FROM, TO, REL];
        clauses.push(Clause::With {
            items: idents.iter().map(|i| (*i).to_owned()).collect(),
            distinct: false,
            paging: Paging::default(),
            predicates: Vec::new(),
        });
        clauses.push(Clause::Set {
            items: vec![SetItem::Replace {
                ident: REL.into(),
                param: format!("{REL}_props"),
            }],
        });
        clauses.push(Clause::Return {
            items: idents.iter().map(|i| ReturnItem::Ident((*i).to_owned())).collect(),
            distinct: false,
            paging: Paging::default(),
        });
        CypherQuery { clauses, params }
    }

    fn finish(&mut self, created: &Created, ticket: &TxTicket) {
        self.from.mark_stored(&created.from, ticket);
        self.to.mark_stored(&created.to, ticket);
        self.rel.mark_stored(&created.rel, ticket);
        self.transition(SaveState::Persisted);
        debug!(
            rel_type = %self.rel.rel_type(),
            id = created.rel.id,
            start = created.rel.start,
            end = created.rel.end,
            "Relationship persisted"
        );
    }
}

fn parse_created(row: Option<&crate::engine::Row>) -> Result<Created> {
    let missing = || OgmError::Engine(EngineError::Failure("relationship creation returned no row".into()));
    let row = row.ok_or_else(missing)?;
    let node = |ident: &str| row.get(ident).and_then(Value::as_node).cloned();
    Ok(Created {
        from: node(FROM).ok_or_else(missing)?,
        to: node(TO).ok_or_else(missing)?,
        rel: row
            .get(REL)
            .and_then(Value::as_relationship)
            .cloned()
            .ok_or_else(missing)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::MemoryGraph;
    use crate::entity::Hooks;
    use crate::props;
    use crate::schema::{NodeModel, RelModel, Schema};

    fn schema(rel: RelModel) -> Schema {
        Schema::new()
            .node(NodeModel::new("Student").hooks(Hooks::new().validate(|entity, errors| {
                if entity.get("name").is_none() {
                    errors.add("name", "can't be blank");
                }
            })))
            .node(NodeModel::new("Lesson"))
            .rel(rel)
    }

    fn enrolled_in() -> RelModel {
        RelModel::new("EnrolledIn", "lessons")
            .from_class("Student")
            .to_class("Lesson")
            .default_value("absence_count", 0)
    }

    fn setup(rel: RelModel) -> (Arc<MemoryGraph>, Session) {
        let graph = Arc::new(MemoryGraph::new());
        (graph.clone(), Session::new(graph, schema(rel)))
    }

    #[test]
    fn persisted_endpoints_use_one_query() {
        let (graph, session) = setup(enrolled_in());
        let mut jimmy = Node::create(&session, "Student", props! { "name" => "Jimmy" }).expect("student");
        let mut math = Node::create(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        let begins = graph.stats().begins;
        graph.clear_history();

        let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");
        assert!(rel.save(&session, &mut jimmy, &mut math).expect("save"));
        assert!(rel.persisted());
        assert_eq!(rel.get("absence_count"), Some(&Value::Int(0)));
        assert_eq!(graph.history().len(), 1);
        assert_eq!(graph.stats().begins, begins + 1);
    }

    #[test]
    fn halting_after_create_between_persisted_endpoints_leaves_no_relationship() {
        let (graph, session) = setup(enrolled_in().hooks(Hooks::new().after_create(|_| false)));
        let mut jimmy = Node::create(&session, "Student", props! { "name" => "Jimmy" }).expect("student");
        let mut math = Node::create(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");

        assert!(!rel.save(&session, &mut jimmy, &mut math).expect("save"));
        assert!(!rel.persisted());
        assert!(jimmy.persisted() && math.persisted());
        assert_eq!(graph.relationship_count(), 0);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(session.metrics().rollbacks, 1);
    }

    #[test]
    fn unsaved_endpoints_commit_in_one_transaction() {
        let (graph, session) = setup(enrolled_in());
        let mut jimmy = Node::new(&session, "Student", props! { "name" => "Jimmy" }).expect("student");
        let mut math = Node::new(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");

        let planner = RelationshipTxPlanner::new(&session, &mut rel, &mut jimmy, &mut math);
        let plan = planner.plan();
        let depths: Vec<_> = plan.steps().iter().map(|p| p.depth).collect();
        assert_eq!(depths, vec![0, 1, 2]);
        assert!(matches!(plan.steps()[0].step, CreationStep::CreateEndpoint(Side::From)));
        assert!(planner.save().expect("save"));

        assert!(jimmy.persisted() && math.persisted() && rel.persisted());
        assert_eq!(rel.start_id(), jimmy.id());
        assert_eq!(rel.end_id(), math.id());
        let stats = graph.stats();
        assert_eq!((stats.begins, stats.commits), (1, 1));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.relationship_count(), 1);
    }

    #[test]
    fn class_mismatch_is_an_error() {
        let (graph, session) = setup(enrolled_in());
        let mut math = Node::new(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        let mut other = Node::new(&session, "Lesson", props! { "name" => "history" }).expect("lesson");
        let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");
        let err = rel.save(&session, &mut math, &mut other).unwrap_err();
        assert!(matches!(err, OgmError::ClassMismatch { side: Side::From, .. }));
        assert_eq!(graph.node_count(), 0);
        assert!(!math.persisted());
    }

    #[test]
    fn invalid_endpoint_reports_on_relationship() {
        let (graph, session) = setup(enrolled_in());
        let mut nameless = Node::new(&session, "Student", props! {}).expect("student");
        let mut math = Node::new(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");
        assert!(!rel.save(&session, &mut nameless, &mut math).expect("save"));
        assert_eq!(rel.errors().on("from_node"), vec!["failed validation"]);
        assert_eq!(nameless.errors().on("name"), vec!["can't be blank"]);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.stats().begins, 0);
        assert!(matches!(
            rel.save_strict(&session, &mut nameless, &mut math),
            Err(OgmError::InvalidRelationship(_))
        ));
    }

    #[test]
    fn halting_after_create_rolls_everything_back() {
        let (graph, session) = setup(enrolled_in().hooks(Hooks::new().after_create(|_| false)));
        let mut jimmy = Node::new(&session, "Student", props! { "name" => "Jimmy" }).expect("student");
        let mut math = Node::new(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");
        assert!(!rel.save(&session, &mut jimmy, &mut math).expect("save"));
        assert!(!jimmy.persisted() && !math.persisted() && !rel.persisted());
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.stats().rollbacks, 1);
    }

    #[test]
    fn engine_failure_leaves_nothing_behind() {
        let (graph, session) = setup(enrolled_in());
        let mut jimmy = Node::new(&session, "Student", props! { "name" => "Jimmy" }).expect("student");
        let mut math = Node::new(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");
        graph.fail_when("CREATE (n1:");
        assert!(matches!(
            rel.save(&session, &mut jimmy, &mut math),
            Err(OgmError::Engine(EngineError::Failure(_)))
        ));
        assert!(!jimmy.persisted());
        assert_eq!(graph.node_count(), 0);
        assert_eq!(session.scope_depth(), 0);
    }

    #[test]
    fn unique_relationships_merge() {
        let (graph, session) = setup(enrolled_in().unique(true));
        let mut jimmy = Node::create(&session, "Student", props! { "name" => "Jimmy" }).expect("student");
        let mut math = Node::create(&session, "Lesson", props! { "name" => "math" }).expect("lesson");
        for _ in 0..2 {
            let mut rel = Relationship::build(&session, "EnrolledIn", props! {}).expect("rel");
            assert!(rel.save(&session, &mut jimmy, &mut math).expect("save"));
        }
        assert_eq!(graph.relationship_count(), 1);
        assert!(graph.history().last().is_some_and(|q| q.contains("MERGE (n1)-[r:`lessons`]->(n2)")));
    }
}
