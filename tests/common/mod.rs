#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cypher_ogm::engine::MemoryGraph;
use cypher_ogm::schema::{Association, NodeModel, RelModel};
use cypher_ogm::{props, Direction, Hooks, Node, Result, Schema, Session};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Students enrol in lessons through `EnrolledIn`; teachers teach lessons.
/// `Vetoed` relationships are always halted by their after-create callback.
pub struct School {
    pub graph: Arc<MemoryGraph>,
    pub session: Session,
    pub lessons_destroyed: Arc<AtomicUsize>,
    pub enrolments_destroyed: Arc<AtomicUsize>,
}

impl School {
    pub fn new() -> Self {
        init_tracing();
        let lessons_destroyed = Arc::new(AtomicUsize::new(0));
        let enrolments_destroyed = Arc::new(AtomicUsize::new(0));

        let lesson_counter = lessons_destroyed.clone();
        let lesson_hooks = Hooks::new().after_destroy(move |_| {
            lesson_counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let enrolment_counter = enrolments_destroyed.clone();
        let enrolment_hooks = Hooks::new().after_destroy(move |_| {
            enrolment_counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let student_hooks = Hooks::new().validate(|entity, errors| {
            if entity.get("name").is_none() {
                errors.add("name", "can't be blank");
            }
        });

        let schema = Schema::new()
            .node(
                NodeModel::new("Student")
                    .hooks(student_hooks)
                    .has_many(
                        Association::new("lessons", Direction::Out)
                            .target("Lesson")
                            .rel_class("EnrolledIn"),
                    )
                    .has_many(Association::new("things", Direction::Out).rel_type("enrolled_in")),
            )
            .node(
                NodeModel::new("Lesson")
                    .primary_key("uuid")
                    .hooks(lesson_hooks)
                    .has_many(
                        Association::new("students", Direction::In)
                            .target("Student")
                            .rel_class("EnrolledIn"),
                    )
                    .has_many(
                        Association::new("teachers", Direction::In)
                            .target("Teacher")
                            .origin("lessons"),
                    ),
            )
            .node(
                NodeModel::new("Teacher").has_many(
                    Association::new("lessons", Direction::Out)
                        .target("Lesson")
                        .rel_type("teaching_lesson"),
                ),
            )
            .node(NodeModel::new("EmptyClass"))
            .rel(
                RelModel::new("EnrolledIn", "enrolled_in")
                    .from_class("Student")
                    .to_class("Lesson")
                    .default_value("absence_count", 0)
                    .hooks(enrolment_hooks),
            )
            .rel(RelModel::new("Vetoed", "vetoed").hooks(Hooks::new().after_create(|_| false)));

        let graph = Arc::new(MemoryGraph::new());
        let session = Session::new(graph.clone(), schema);
        Self {
            graph,
            session,
            lessons_destroyed,
            enrolments_destroyed,
        }
    }

    pub fn student(&self, name: &str) -> Result<Node> {
        Node::create(&self.session, "Student", props! { "name" => name })
    }

    pub fn lesson(&self, name: &str) -> Result<Node> {
        Node::create(&self.session, "Lesson", props! { "name" => name })
    }

    pub fn teacher(&self, name: &str) -> Result<Node> {
        Node::create(&self.session, "Teacher", props! { "name" => name })
    }

    /// A stored student enrolled in freshly stored lessons.
    pub fn enrolled(&self, name: &str, lessons: &[&str]) -> Result<(Node, Vec<Node>)> {
        let mut student = self.student(name)?;
        let mut out = Vec::with_capacity(lessons.len());
        for lesson in lessons {
            let mut lesson = self.lesson(lesson)?;
            student.connect(&self.session, "lessons", &mut lesson)?;
            out.push(lesson);
        }
        Ok((student, out))
    }

    /// Queries sent through the session so far.
    pub fn queries(&self) -> u64 {
        self.session.metrics().queries
    }

    pub fn lessons_destroyed(&self) -> usize {
        self.lessons_destroyed.load(Ordering::SeqCst)
    }

    pub fn enrolments_destroyed(&self) -> usize {
        self.enrolments_destroyed.load(Ordering::SeqCst)
    }
}

pub fn names(nodes: &[Node]) -> Vec<String> {
    let mut names: Vec<String> = nodes
        .iter()
        .filter_map(|node| node.get("name").and_then(|v| v.as_str()).map(str::to_owned))
        .collect();
    names.sort();
    names
}
