mod common;

use common::{names, School};
use cypher_ogm::{props, OgmError, Params, Result, Value};

#[test]
fn delete_all_skips_destroy_callbacks() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    jimmy.association(&school.session, "lessons")?.delete_all(None)?;

    assert!(school.graph.nodes_labeled("Lesson").is_empty());
    assert_eq!(school.graph.relationship_count(), 0);
    assert_eq!(school.lessons_destroyed(), 0);
    assert!(jimmy.exists_in(&school.session)?);
    Ok(())
}

#[test]
fn destroy_all_runs_callbacks_once_per_entity() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    school.enrolled("Bobby", &["art"])?;

    let destroyed = jimmy.association(&school.session, "lessons")?.destroy_all(None)?;
    assert_eq!(destroyed, 2);
    assert_eq!(school.lessons_destroyed(), 2);
    assert_eq!(names(&school.session.all("Lesson")?.to_a()?), vec!["art"]);
    Ok(())
}

#[test]
fn delete_all_on_relationship_identifier_keeps_nodes() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let lessons = jimmy.association(&school.session, "lessons")?;
    let rel = lessons.rel_identity().expect("hop").to_owned();
    lessons.delete_all(Some(&rel))?;

    assert_eq!(school.graph.relationship_count(), 0);
    assert_eq!(school.graph.nodes_labeled("Lesson").len(), 2);
    assert_eq!(school.enrolments_destroyed(), 0);
    Ok(())
}

#[test]
fn destroy_all_on_relationship_identifier() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let destroyed = jimmy
        .association_as(&school.session, "lessons", "l", Some("e"))?
        .destroy_all(Some("e"))?;
    assert_eq!(destroyed, 2);
    assert_eq!(school.enrolments_destroyed(), 2);
    assert_eq!(school.graph.nodes_labeled("Lesson").len(), 2);
    Ok(())
}

#[test]
fn update_all_on_empty_chain_writes_nothing() -> Result<()> {
    let school = School::new();
    school.student("Jimmy")?;
    let updated = school
        .session
        .all("Student")?
        .r#where(props! { "name" => "Nobody" })
        .update_all(props! { "name" => "Bob" }, None)?;
    assert_eq!(updated, 0);
    assert_eq!(
        school.graph.nodes_labeled("Student")[0].properties.get("name"),
        Some(&Value::from("Jimmy"))
    );
    Ok(())
}

#[test]
fn update_all_with_props_and_raw_assignments() -> Result<()> {
    let school = School::new();
    school.student("Jimmy")?;
    school.student("Bobby")?;
    let students = school.session.all("Student")?;

    assert_eq!(students.update_all(props! { "grade" => 7 }, None)?, 2);
    let mut params = Params::new();
    params.insert("nick", Value::from("JJ"));
    let raw = students
        .r#where(props! { "name" => "Jimmy" })
        .update_all("n.nick = {nick}, n.grade = 8", Some(params))?;
    assert_eq!(raw, 1);

    let jimmy = students.r#where(props! { "name" => "Jimmy" }).first()?.expect("jimmy");
    assert_eq!(jimmy.get("nick"), Some(&Value::from("JJ")));
    assert_eq!(jimmy.get("grade"), Some(&Value::Int(8)));
    assert!(matches!(
        students.update_all(Value::Int(3), None),
        Err(OgmError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn update_all_respects_limit() -> Result<()> {
    let school = School::new();
    for name in ["a", "b", "c"] {
        school.student(name)?;
    }
    let updated = school
        .session
        .all("Student")?
        .order("name")
        .limit(2)?
        .update_all(props! { "picked" => true }, None)?;
    assert_eq!(updated, 2);
    let picked = school.session.all("Student")?.r#where(props! { "picked" => true });
    assert_eq!(names(&picked.to_a()?), vec!["a", "b"]);
    Ok(())
}

#[test]
fn update_all_rels_sets_relationship_properties() -> Result<()> {
    let school = School::new();
    let (jimmy, _) = school.enrolled("Jimmy", &["math", "science"])?;
    let lessons = jimmy.association(&school.session, "lessons")?;
    assert_eq!(lessons.update_all_rels(props! { "absence_count" => 2 }, None)?, 2);
    assert!(school
        .graph
        .relationships_of_type("enrolled_in")
        .iter()
        .all(|rel| rel.properties.get("absence_count") == Some(&Value::Int(2))));

    let students = school.session.all("Student")?;
    assert!(matches!(
        students.update_all_rels(props! { "x" => 1 }, None),
        Err(OgmError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn find_or_create_by_on_association_creates_once() -> Result<()> {
    let school = School::new();
    let math = school.lesson("math")?;
    let teachers = math.association(&school.session, "teachers")?;

    let rebecca = teachers.find_or_create_by(props! { "name" => "Rebecca" })?;
    assert!(rebecca.persisted());
    assert_eq!(school.graph.nodes_labeled("Teacher").len(), 1);
    assert_eq!(school.graph.relationships_of_type("teaching_lesson").len(), 1);

    let again = teachers.find_or_create_by(props! { "name" => "Rebecca" })?;
    assert_eq!(again, rebecca);
    assert_eq!(school.graph.nodes_labeled("Teacher").len(), 1);
    assert_eq!(school.graph.relationships_of_type("teaching_lesson").len(), 1);

    let rel = &school.graph.relationships_of_type("teaching_lesson")[0];
    assert_eq!(Some(rel.start), rebecca.id());
    assert_eq!(Some(rel.end), math.id());
    Ok(())
}

#[test]
fn find_or_create_by_on_model_chain() -> Result<()> {
    let school = School::new();
    let students = school.session.all("Student")?;
    let created = students.find_or_create_by(props! { "name" => "Jimmy" })?;
    let found = students.find_or_create_by(props! { "name" => "Jimmy" })?;
    assert_eq!(created, found);
    assert_eq!(school.graph.nodes_labeled("Student").len(), 1);
    Ok(())
}

#[test]
fn rels_to_and_first_rel_to() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math", "science"])?;
    let chain = jimmy.association(&school.session, "lessons")?;

    let rels = chain.rels_to(&lessons[0])?;
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].end_id(), lessons[0].id());
    assert_eq!(chain.first_rel_to(&lessons[1])?.and_then(|r| r.end_id()), lessons[1].id());
    assert_eq!(chain.rels_to(lessons.as_slice())?.len(), 2);
    Ok(())
}

#[test]
fn delete_and_destroy_remove_relationships_only() -> Result<()> {
    let school = School::new();
    let (jimmy, lessons) = school.enrolled("Jimmy", &["math", "science", "art"])?;
    let chain = jimmy.association(&school.session, "lessons")?;

    chain.delete(&lessons[0])?;
    assert_eq!(school.enrolments_destroyed(), 0);
    assert_eq!(chain.count()?, 2);

    assert_eq!(chain.destroy(vec![&lessons[1], &lessons[2]])?, 2);
    assert_eq!(school.enrolments_destroyed(), 2);
    assert_eq!(chain.count()?, 0);
    assert_eq!(school.graph.nodes_labeled("Lesson").len(), 3);
    Ok(())
}
