//! Query execution tests
//!
//! Covers:
//! - Local validation of queries and options
//! - Concept decoding for types, roles, things and attributes
//! - Insert, match-insert, update and match-delete writes
//! - Aggregates, groups, fetch documents and rule explanations
//! - Service errors raised by queries

mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::*;
use conceptdb_driver::{
    Connection, ConceptKind, DriverError, Options, ServerErrorCode, Session, SessionType,
    Transaction, TransactionType, TypeApi, Value,
};
use futures::StreamExt;
use tokio_test::{assert_err, assert_ok};

const PEOPLE: &[(&str, i64)] = &[("Alice", 30), ("Bob", 25), ("Carol", 41)];

async fn read(session: &Session) -> Transaction {
    session.transaction(TransactionType::Read).await.unwrap()
}

async fn count(session: &Session, query: &str) -> i64 {
    let tx = read(session).await;
    let value = tx.query().get_aggregate(query, &Options::new()).await.unwrap();
    value.and_then(|v| v.as_long().ok()).unwrap_or(-1)
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_empty_query_rejected_locally() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let before = server.request_count();
    let err = assert_err!(tx.query().get("   ", &Options::new()).await);
    assert_eq!(err, DriverError::MissingQuery);
    let err = assert_err!(tx.query().get_aggregate("", &Options::new()).await);
    assert_eq!(err, DriverError::MissingQuery);

    let err = assert_err!(
        tx.query()
            .get("match $p isa person;", &Options::new().prefetch_size(0))
            .await
    );
    assert_eq!(err, DriverError::PositiveValueRequired("prefetch_size"));
    assert_eq!(server.request_count(), before);
    assert!(tx.is_open());
}

#[tokio::test]
async fn test_syntax_error_closes_transaction() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let mut answers = tx
        .query()
        .get("match $p isa person; get $p", &Options::new())
        .await
        .unwrap();
    let err = assert_err!(answers.next().await.unwrap());
    assert_eq!(
        err.server_error().map(|e| e.code),
        Some(ServerErrorCode::QuerySyntax)
    );
    assert!(answers.next().await.is_none());
    assert!(!tx.is_open());
}

#[tokio::test]
async fn test_query_type_mismatch() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    // A plain match submitted as an aggregate
    let err = assert_err!(
        tx.query()
            .get_aggregate("match $p isa person;", &Options::new())
            .await
    );
    assert_eq!(
        err.server_error().map(|e| e.code),
        Some(ServerErrorCode::QueryTypeMismatch)
    );
    assert!(!tx.is_open());
}

#[tokio::test]
async fn test_insert_in_read_transaction_fails() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let answers = tx
        .query()
        .insert("insert $p isa person;", &Options::new())
        .await
        .unwrap();
    let err = assert_err!(answers.drain().await);
    assert_eq!(
        err.server_error().map(|e| e.code),
        Some(ServerErrorCode::ReadOnlyTransaction)
    );
}

// ============================================================================
// Concepts
// ============================================================================

#[tokio::test]
async fn test_type_concepts() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let answers = tx
        .query()
        .get("match $t sub thing;", &Options::new())
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    let labels: BTreeSet<String> = answers
        .iter()
        .filter_map(|map| map.get("t").ok().and_then(|c| c.label()))
        .collect();
    for expected in ["thing", "entity", "relation", "attribute", "person", "name", "age"] {
        assert!(labels.contains(expected), "missing {} in {:?}", expected, labels);
    }

    let person = answers
        .iter()
        .map(|map| map.get("t").unwrap())
        .find(|c| c.label().as_deref() == Some("person"))
        .unwrap();
    assert_eq!(person.kind(), ConceptKind::EntityType);
    assert!(!assert_ok!(person.as_entity_type()).is_abstract());
    let err = assert_err!(person.as_attribute_type());
    assert!(matches!(err, DriverError::InvalidConceptCast { .. }));
}

#[tokio::test]
async fn test_role_types_use_scoped_labels() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let answers = tx
        .query()
        .get("match $r sub relation:role;", &Options::new())
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    let labels: BTreeSet<String> = answers
        .iter()
        .filter_map(|map| map.get("r").ok().and_then(|c| c.label()))
        .collect();
    assert!(labels.contains("friendship:friend"), "got {:?}", labels);

    let role = answers
        .iter()
        .map(|map| map.get("r").unwrap())
        .find(|c| c.label().as_deref() == Some("friendship:friend"))
        .unwrap();
    assert_eq!(assert_ok!(role.as_role_type()).scoped_label().scope, "friendship");
}

#[tokio::test]
async fn test_attribute_values() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", PEOPLE).await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let answers = tx
        .query()
        .get(
            "match $p isa person, has name \"Alice\", has age $a;",
            &Options::new(),
        )
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    assert_eq!(answers.len(), 1);

    let map = &answers[0];
    let person = assert_ok!(map.get("p"));
    assert!(person.is_entity());
    assert!(!assert_ok!(person.as_thing()).is_inferred());
    assert_eq!(assert_ok!(person.as_entity()).type_().label(), "person");

    let age = assert_ok!(map.get("a"));
    let attribute = assert_ok!(age.as_attribute());
    assert_eq!(attribute.value(), &Value::Long(30));
    assert_eq!(assert_ok!(attribute.value().as_long()), 30);
    assert!(attribute.value().as_string().is_err());

    let err = assert_err!(map.get("missing"));
    assert_eq!(err, DriverError::VariableDoesNotExist("missing".to_string()));
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_insert_returns_new_things() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    let answers = tx
        .query()
        .insert(
            "insert $p isa person, has name \"Dana\", has age 52;",
            &Options::new(),
        )
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    assert_eq!(answers.len(), 1);
    assert!(assert_ok!(answers[0].get("p")).is_entity());
    tx.commit().await.unwrap();

    assert_eq!(
        count(&session, "match $p isa person, has name \"Dana\"; get; count;").await,
        1
    );
}

#[tokio::test]
async fn test_match_insert_writes_per_answer() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", PEOPLE).await;
    let session = data_session(&connection, "social").await;

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    let written = tx
        .query()
        .insert(
            "match $p isa person, has age $a; insert $p has name \"Member\";",
            &Options::new().prefetch_size(1),
        )
        .await
        .unwrap()
        .drain()
        .await
        .unwrap();
    assert_eq!(written, 3);
    tx.commit().await.unwrap();

    assert_eq!(
        count(&session, "match $p isa person, has name \"Member\"; get; count;").await,
        3
    );
}

#[tokio::test]
async fn test_update_replaces_ownership() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", PEOPLE).await;
    let session = data_session(&connection, "social").await;

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    let updated = tx
        .query()
        .update(
            "match $p isa person, has name \"Bob\", has age $a; delete $p has $a; insert $p has age 26;",
            &Options::new(),
        )
        .await
        .unwrap()
        .drain()
        .await
        .unwrap();
    assert_eq!(updated, 1);
    tx.commit().await.unwrap();

    assert_eq!(
        count(&session, "match $p isa person, has name \"Bob\", has age 26; get; count;").await,
        1
    );
    assert_eq!(
        count(&session, "match $p isa person, has name \"Bob\", has age 25; get; count;").await,
        0
    );
}

#[tokio::test]
async fn test_match_delete_removes_things() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", PEOPLE).await;
    let session = data_session(&connection, "social").await;

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    assert_ok!(
        tx.query()
            .match_delete(
                "match $p isa person, has name \"Carol\"; delete $p isa person;",
                &Options::new(),
            )
            .await
    );
    tx.commit().await.unwrap();

    assert_eq!(count(&session, "match $p isa person; get; count;").await, 2);
}

#[tokio::test]
async fn test_schema_session_defines_types() {
    let server = start_server();
    let connection = connect(&server).await;
    connection.databases().create("zoo").await.unwrap();
    let session = Session::open(
        &connection.databases(),
        "zoo",
        SessionType::Schema,
        &Options::new(),
    )
    .await
    .unwrap();

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    assert_ok!(
        tx.query()
            .define(
                "define species sub attribute, value string; animal sub entity, owns species;",
                &Options::new(),
            )
            .await
    );
    tx.commit().await.unwrap();

    let schema = connection.databases().get("zoo").await.unwrap().schema().await.unwrap();
    assert!(schema.contains("animal sub entity, owns species;"), "{}", schema);

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    assert_ok!(
        tx.query()
            .undefine("undefine animal sub entity;", &Options::new())
            .await
    );
    tx.commit().await.unwrap();

    let schema = connection.databases().get("zoo").await.unwrap().schema().await.unwrap();
    assert!(!schema.contains("animal"), "{}", schema);
}

#[tokio::test]
async fn test_invalid_definition_is_schema_violation() {
    let server = start_server();
    let connection = connect(&server).await;
    connection.databases().create("zoo").await.unwrap();
    let session = Session::open(
        &connection.databases(),
        "zoo",
        SessionType::Schema,
        &Options::new(),
    )
    .await
    .unwrap();

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    let err = assert_err!(
        tx.query()
            .define("define nickname sub attribute;", &Options::new())
            .await
    );
    assert_eq!(
        err.server_error().map(|e| e.code),
        Some(ServerErrorCode::SchemaViolation)
    );
    assert!(!tx.is_open());
}

// ============================================================================
// Aggregates and groups
// ============================================================================

#[tokio::test]
async fn test_aggregates() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", PEOPLE).await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let cases = [
        ("match $p isa person; get; count;", Value::Long(3)),
        ("match $p isa person, has age $a; get; sum $a;", Value::Long(96)),
        ("match $p isa person, has age $a; get; max $a;", Value::Long(41)),
        ("match $p isa person, has age $a; get; min $a;", Value::Long(25)),
        ("match $p isa person, has age $a; get; mean $a;", Value::Double(32.0)),
    ];
    for (query, expected) in cases {
        let value = tx.query().get_aggregate(query, &Options::new()).await.unwrap();
        assert_eq!(value, Some(expected), "{}", query);
    }

    let empty = tx
        .query()
        .get_aggregate(
            "match $p isa person, has name \"Nobody\", has age $a; get; max $a;",
            &Options::new(),
        )
        .await
        .unwrap();
    assert_eq!(empty, None);
}

#[tokio::test]
async fn test_long_sum_overflow_fails_the_query() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", &[("Max", i64::MAX), ("One", 1)]).await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let err = assert_err!(
        tx.query()
            .get_aggregate("match $p isa person, has age $a; get $a; sum $a;", &Options::new())
            .await
    );
    assert_eq!(
        err.server_error().map(|e| e.code),
        Some(ServerErrorCode::ArithmeticOverflow)
    );
    assert!(!tx.is_open());
}

#[tokio::test]
async fn test_group_and_group_aggregate() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", &[("Alice", 30), ("Bob", 30), ("Carol", 41)]).await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let groups = tx
        .query()
        .get_group("match $p isa person, has age $a; get; group $a;", &Options::new())
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    let sizes: BTreeMap<i64, usize> = groups
        .iter()
        .map(|group| {
            let age = group.owner().as_attribute().unwrap().value().as_long().unwrap();
            (age, group.concept_maps().len())
        })
        .collect();
    assert_eq!(sizes, BTreeMap::from([(30, 2), (41, 1)]));

    let counts = tx
        .query()
        .get_group_aggregate(
            "match $p isa person, has age $a; get; group $a; count;",
            &Options::new(),
        )
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    let counts: BTreeMap<i64, Option<Value>> = counts
        .iter()
        .map(|group| {
            let age = group.owner().as_attribute().unwrap().value().as_long().unwrap();
            (age, group.value().cloned())
        })
        .collect();
    assert_eq!(
        counts,
        BTreeMap::from([(30, Some(Value::Long(2))), (41, Some(Value::Long(1)))])
    );
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn test_fetch_documents() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", PEOPLE).await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let documents = tx
        .query()
        .fetch(
            "match $p isa person, has name \"Alice\"; fetch $p: name, age;",
            &Options::new(),
        )
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    assert_eq!(documents.len(), 1);

    let person = &documents[0]["p"];
    assert_eq!(person["type"]["label"], "person");
    assert_eq!(person["type"]["root"], "entity");
    assert_eq!(person["name"][0]["value"], "Alice");
    assert_eq!(person["age"][0]["value"], 30);
    assert_eq!(person["age"][0]["value_type"], "long");
    assert_eq!(person["age"][0]["type"]["label"], "age");
}

// ============================================================================
// Inference and explanations
// ============================================================================

async fn define_anonymous_rule(connection: &Connection, database: &str) {
    let session = Session::open(
        &connection.databases(),
        database,
        SessionType::Schema,
        &Options::new(),
    )
    .await
    .unwrap();
    let tx = session.transaction(TransactionType::Write).await.unwrap();
    tx.query()
        .define(
            "define rule anon: when { $x isa person; } then { $x has name \"Anonymous\"; };",
            &Options::new(),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_inferred_ownership_needs_infer() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    define_anonymous_rule(&connection, "social").await;

    let session = data_session(&connection, "social").await;
    let tx = session.transaction(TransactionType::Write).await.unwrap();
    tx.query()
        .insert("insert $p isa person;", &Options::new())
        .await
        .unwrap()
        .drain()
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let query = "match $p isa person, has name $n; get; count;";
    assert_eq!(count(&session, query).await, 0);

    let tx = read(&session).await;
    let inferred = tx
        .query()
        .get_aggregate(query, &Options::new().infer(true))
        .await
        .unwrap();
    assert_eq!(inferred, Some(Value::Long(1)));
}

#[tokio::test]
async fn test_explain_inferred_ownership() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    define_anonymous_rule(&connection, "social").await;

    let session = data_session(&connection, "social").await;
    let tx = session.transaction(TransactionType::Write).await.unwrap();
    tx.query()
        .insert("insert $p isa person;", &Options::new())
        .await
        .unwrap()
        .drain()
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let options = Options::new().infer(true).explain(true);
    let tx = session
        .transaction_with_options(TransactionType::Read, &options)
        .await
        .unwrap();
    let answers = tx
        .query()
        .get("match $p isa person, has name $n;", &Options::new())
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    assert_eq!(answers.len(), 1);

    let name = assert_ok!(answers[0].get("n"));
    assert!(assert_ok!(name.as_thing()).is_inferred());
    assert_eq!(
        assert_ok!(name.as_attribute()).value(),
        &Value::String("Anonymous".to_string())
    );

    let explainables = answers[0].explainables();
    let explainable = assert_ok!(explainables.ownership("p", "n"));
    let err = assert_err!(explainables.ownership("n", "p"));
    assert!(matches!(err, DriverError::NonexistentExplainableOwnership { .. }));

    let explanations = tx
        .query()
        .explain(explainable, &Options::new())
        .await
        .unwrap()
        .collect_vec()
        .await
        .unwrap();
    assert_eq!(explanations.len(), 1);

    let explanation = &explanations[0];
    assert_eq!(explanation.rule().label, "anon");
    assert_eq!(assert_ok!(explanation.query_variable_mapping("p")), ["x".to_string()]);
    assert_eq!(assert_ok!(explanation.query_variable_mapping("n")), ["_0".to_string()]);
    assert!(assert_ok!(explanation.condition().get("x")).is_entity());
    assert!(assert_ok!(explanation.conclusion().get("_0")).is_attribute());
}

// ============================================================================
// Rules
// ============================================================================

#[tokio::test]
async fn test_put_and_read_rules() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let schema = Session::open(
        &connection.databases(),
        "social",
        SessionType::Schema,
        &Options::new(),
    )
    .await
    .unwrap();

    let tx = schema.transaction(TransactionType::Write).await.unwrap();
    let rule = assert_ok!(
        tx.logic()
            .put_rule("anon", "{ $x isa person; }", "{ $x has name \"Anonymous\"; }")
            .await
    );
    assert_eq!(rule.label, "anon");
    assert_eq!(rule.when, "$x isa person;");
    assert_eq!(rule.then, "$x has name \"Anonymous\";");
    assert_eq!(assert_ok!(tx.logic().get_rule("anon").await), Some(rule.clone()));
    tx.commit().await.unwrap();

    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;
    assert_eq!(assert_ok!(tx.logic().get_rule("anon").await), Some(rule.clone()));
    assert_eq!(assert_ok!(tx.logic().get_rule("missing").await), None);
    let rules = tx.logic().get_rules().await.unwrap().collect_vec().await.unwrap();
    assert_eq!(rules, vec![rule]);

    let before = server.request_count();
    let err = assert_err!(tx.logic().get_rule("  ").await);
    assert_eq!(err, DriverError::MissingRuleLabel);
    assert_eq!(server.request_count(), before);
    assert!(tx.is_open());
}

#[tokio::test]
async fn test_put_rule_needs_schema_session() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    let session = data_session(&connection, "social").await;

    let tx = session.transaction(TransactionType::Write).await.unwrap();
    let err = assert_err!(
        tx.logic()
            .put_rule("anon", "$x isa person;", "$x has name \"Anonymous\";")
            .await
    );
    assert_eq!(
        err.server_error().map(|e| e.code),
        Some(ServerErrorCode::SchemaWriteInDataSession)
    );
    assert!(!tx.is_open());
}

// ============================================================================
// Streams
// ============================================================================

#[tokio::test]
async fn test_finished_stream_stays_finished() {
    let server = start_server();
    let connection = connect(&server).await;
    create_social_database(&connection, "social").await;
    insert_people(&connection, "social", PEOPLE).await;
    let session = data_session(&connection, "social").await;
    let tx = read(&session).await;

    let mut answers = tx
        .query()
        .get(
            "match $p isa person;",
            &Options::new().prefetch(false),
        )
        .await
        .unwrap();
    let mut seen = 0;
    while let Some(answer) = answers.next().await {
        assert_ok!(answer);
        seen += 1;
    }
    assert_eq!(seen, 3);
    assert!(answers.next().await.is_none());
    assert!(futures::stream::FusedStream::is_terminated(&answers));
    assert!(tx.is_open());
}
