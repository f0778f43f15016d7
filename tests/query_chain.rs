mod common;

use common::{names, School};
use cypher_ogm::{props, Chain, Condition, MatchTarget, Node, OgmError, Params, Result, Value};

#[test]
fn count_requeries_until_rows_are_cached() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let lessons = jimmy.association(&school.session, "lessons")?;

    let before = school.queries();
    assert_eq!(lessons.count()?, 2);
    assert_eq!(lessons.count()?, 2);
    assert!(!lessons.is_empty()?);
    assert_eq!(school.queries() - before, 3);
    Ok(())
}

#[test]
fn size_queries_once() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let lessons = jimmy.association(&school.session, "lessons")?;

    let before = school.queries();
    assert_eq!(lessons.size()?, 2);
    assert_eq!(lessons.size()?, 2);
    assert_eq!(school.queries() - before, 1);
    Ok(())
}

#[test]
fn length_materializes_and_feeds_later_counts() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let lessons = jimmy.association(&school.session, "lessons")?;

    let before = school.queries();
    assert_eq!(lessons.length()?, 2);
    assert_eq!(lessons.size()?, 2);
    assert_eq!(lessons.count()?, 2);
    assert!(lessons.exists(None)?);
    assert_eq!(names(&lessons.to_a()?), vec!["math", "science"]);
    assert_eq!(school.queries() - before, 1);
    assert!(school.session.metrics().cache_hits >= 4);
    Ok(())
}

#[test]
fn builder_calls_start_with_empty_caches() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let lessons = jimmy.association(&school.session, "lessons")?;
    lessons.to_a()?;

    let before = school.queries();
    let filtered = lessons.r#where(props! { "name" => "math" });
    assert_eq!(filtered.count()?, 1);
    assert_eq!(lessons.count()?, 2);
    assert_eq!(school.queries() - before, 1);
    Ok(())
}

#[test]
fn renders_deterministic_parameter_names() -> Result<()> {
    let school = School::new();
    let chain = school
        .session
        .all_as("Student", "s")?
        .r#where(props! { "name" => "Jimmy" })
        .association("lessons")?
        .r#where(props! { "name" => "math" })
        .limit(2)?;
    assert_eq!(
        chain.to_cypher()?,
        "MATCH (s:`Student`) WHERE (s.name = $s_name) \
         MATCH (s)-[rel1:`enrolled_in`]->(node2:`Lesson`) WHERE (node2.name = $node2_name) \
         RETURN node2, rel1 LIMIT 2"
    );
    assert_eq!(chain.to_query()?, chain.to_query()?);
    assert_eq!(chain.limit_value(), Some(2));
    Ok(())
}

#[test]
fn entity_anchor_uses_association_prefix() -> Result<()> {
    let school = School::new();
    let jimmy = school.student("Jimmy")?;
    let lessons = jimmy.association(&school.session, "lessons")?;
    let id = jimmy.id().expect("stored");
    assert_eq!(lessons.identity(), "result_lessons");
    assert_eq!(lessons.rel_identity(), Some("rel1"));
    assert!(lessons
        .to_cypher()?
        .starts_with(&format!("MATCH (student{id}) WHERE (ID(student{id}) = $student{id}_id)")));
    Ok(())
}

#[test]
fn negative_limit_is_invalid_argument() -> Result<()> {
    let school = School::new();
    let students = school.session.all("Student")?;
    assert!(matches!(students.limit(-1), Err(OgmError::InvalidArgument(_))));
    assert_eq!(students.limit_value(), None);
    Ok(())
}

#[test]
fn order_skip_limit_first_last() -> Result<()> {
    let school = School::new();
    for name in ["science", "art", "math"] {
        school.lesson(name)?;
    }
    let lessons = school.session.all("Lesson")?.order("name");
    assert_eq!(lessons.first()?.and_then(|n| n.get("name").cloned()), Some(Value::from("art")));
    assert_eq!(lessons.last()?.and_then(|n| n.get("name").cloned()), Some(Value::from("science")));

    let page = school.session.all("Lesson")?.order_desc("name").skip(1).limit(1)?;
    assert_eq!(page.pluck(&["n.name"], false)?, vec![vec![Value::from("math")]]);
    assert_eq!(page.count()?, 1);
    Ok(())
}

#[test]
fn match_to_nothing_yields_no_rows() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math"])?;
    let lessons = jimmy.association(&school.session, "lessons")?;
    assert!(lessons.match_to(None::<&Node>)?.to_a()?.is_empty());
    assert_eq!(lessons.match_to(Value::Null)?.count()?, 0);
    assert!(lessons.match_to(Vec::<&Node>::new())?.is_empty()?);
    Ok(())
}

#[test]
fn match_to_collection_keeps_connected_subset() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math", "science"])?;
    let history = school.lesson("history")?;

    let chain = jimmy.association(&school.session, "lessons")?;
    let found = chain.match_to(vec![&lessons[0], &history])?.to_a()?;
    assert_eq!(names(&found), vec!["math"]);

    let both = chain.match_to(lessons.as_slice())?.to_a()?;
    assert_eq!(names(&both), vec!["math", "science"]);
    Ok(())
}

#[test]
fn match_to_primary_keys() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math", "science"])?;
    let chain = jimmy.association(&school.session, "lessons")?;

    let key = lessons[1].key().cloned().expect("uuid");
    let found = chain.match_to(key.clone())?.first()?.expect("science");
    assert_eq!(found, lessons[1]);

    let keys = Value::List(vec![key, Value::from("no-such-uuid")]);
    assert_eq!(chain.match_to(keys)?.count()?, 1);
    Ok(())
}

#[test]
fn match_to_rejects_unsaved_and_mixed_targets() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math"])?;
    let chain = jimmy.association(&school.session, "lessons")?;

    let unsaved = Node::new(&school.session, "Lesson", props! { "name" => "draft" })?;
    assert!(matches!(chain.match_to(&unsaved), Err(OgmError::InvalidParameter(_))));

    let mixed = MatchTarget::Many(vec![MatchTarget::from(&lessons[0]), MatchTarget::from("uuid")]);
    assert!(matches!(chain.match_to(mixed), Err(OgmError::InvalidParameter(_))));

    let students = school.session.all("Student")?;
    assert!(matches!(students.match_to("no-key"), Err(OgmError::InvalidParameter(_))));
    Ok(())
}

#[test]
fn count_modes() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math"])?;
    let mut math = lessons[0].clone();
    let mut jimmy = jimmy;
    jimmy.connect(&school.session, "lessons", &mut math)?;

    let chain = jimmy.association(&school.session, "lessons")?;
    assert_eq!(chain.count()?, 2);
    assert_eq!(chain.count_with(Some("distinct"), None)?, 1);
    assert!(matches!(
        chain.count_with(Some("foo"), None),
        Err(OgmError::InvalidParameter(_))
    ));

    let all = school.session.all_as("Student", "s")?.association_as("lessons", "l", None)?;
    assert_eq!(all.count_with(Some("distinct"), Some("s"))?, 1);
    Ok(())
}

#[test]
fn exists_by_id_props_or_nothing() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math"])?;
    let chain = jimmy.association(&school.session, "lessons")?;
    let math_id = lessons[0].id().expect("stored") as i64;

    assert!(chain.exists(None)?);
    assert!(chain.exists(Some(Value::Int(math_id)))?);
    assert!(!chain.exists(Some(Value::Int(math_id + 100)))?);
    assert!(chain.exists(Some(props! { "name" => "math" }.into()))?);
    assert!(!chain.exists(Some(props! { "name" => "art" }.into()))?);
    assert!(matches!(
        chain.exists(Some(Value::from("math"))),
        Err(OgmError::InvalidParameter(_))
    ));

    let empty = school.session.all("EmptyClass")?;
    assert!(empty.is_empty()?);
    assert!(empty.is_blank()?);
    Ok(())
}

#[test]
fn include_checks_terminal_or_named_identifier() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math"])?;
    let history = school.lesson("history")?;
    let bobby = school.student("Bobby")?;

    let chain = jimmy.association(&school.session, "lessons")?;
    assert!(chain.include(&lessons[0], None)?);
    assert!(!chain.include(&history, None)?);

    let ordered = school
        .session
        .all_as("Student", "s")?
        .association_as("lessons", "l", None)?
        .order_by("l", "name", false);
    assert!(ordered.include(&jimmy, Some("s"))?);
    assert!(!ordered.include(&bobby, Some("s"))?);
    Ok(())
}

#[test]
fn branch_constrains_without_moving_terminal() -> Result<()> {
    let school = School::new();
    let mut math = school.lesson("math")?;
    school.lesson("art")?;
    let mut adams = school.teacher("Mr Adams")?;
    adams.connect(&school.session, "lessons", &mut math)?;

    let lessons = school.session.all_as("Lesson", "l")?;
    let taught = lessons.branch(|chain| chain.association("teachers"))?;
    assert_eq!(taught.identity(), "l");
    assert_eq!(names(&taught.to_a()?), vec!["math"]);

    let missing = lessons.branch_with(None::<fn(Chain) -> Result<Chain>>);
    assert!(matches!(missing, Err(OgmError::MissingTransform)));
    Ok(())
}

#[test]
fn optional_match_keeps_unmatched_rows() -> Result<()> {
    let school = School::new();
    let mut math = school.lesson("math")?;
    school.lesson("art")?;
    let mut adams = school.teacher("Mr Adams")?;
    adams.connect(&school.session, "lessons", &mut math)?;

    let rows = school
        .session
        .all_as("Lesson", "l")?
        .optional_as("teachers", "t", None)?
        .order_by("l", "name", false)
        .pluck(&["l.name", "t.name"], false)?;
    assert_eq!(
        rows,
        vec![
            vec![Value::from("art"), Value::Null],
            vec![Value::from("math"), Value::from("Mr Adams")],
        ]
    );
    Ok(())
}

#[test]
fn untyped_association_loads_by_label() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math"])?;
    let things = jimmy.association(&school.session, "things")?;
    assert!(things.model().is_none());
    let found = things.to_a()?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].model().name(), "Lesson");
    assert!(matches!(
        things.association("students"),
        Err(OgmError::UnknownAssociation { .. })
    ));
    Ok(())
}

#[test]
fn raw_where_with_parameters() -> Result<()> {
    let school = School::new();
    school.student("Jimmy")?;
    school.student("Bobby")?;
    let mut params = Params::new();
    params.insert("wanted", Value::from("Bobby"));
    let found = school
        .session
        .all("Student")?
        .r#where(Condition::raw("n.name = {wanted}", params))
        .to_a()?;
    assert_eq!(names(&found), vec!["Bobby"]);
    Ok(())
}

#[test]
fn each_with_rel_pairs_nodes_and_relationships() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let pairs = jimmy.association(&school.session, "lessons")?.each_with_rel()?;
    assert_eq!(pairs.len(), 2);
    for (lesson, rel) in &pairs {
        assert_eq!(rel.model().name(), "EnrolledIn");
        assert_eq!(rel.start_id(), jimmy.id());
        assert_eq!(rel.end_id(), lesson.id());
        assert_eq!(rel.get("absence_count"), Some(&Value::Int(0)));
    }
    assert!(matches!(
        school.session.all("Student")?.each_with_rel(),
        Err(OgmError::InvalidArgument(_))
    ));
    Ok(())
}
