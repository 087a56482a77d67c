//! Common helpers for driver integration tests
//!
//! Provides:
//! - Tracing output controlled by `RUST_LOG`
//! - A fresh in-memory server per test
//! - A database seeded with a small social schema

#![allow(dead_code)]

use std::sync::{Arc, Once};

use conceptdb_driver::{
    Connection, InMemoryServer, Options, Session, SessionType, TransactionType,
};

pub const SOCIAL_SCHEMA: &str = "define
    name sub attribute, value string;
    age sub attribute, value long;
    person sub entity, owns name, owns age;
    friendship sub relation, relates friend;";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("conceptdb_driver=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Server under a name no other test uses.
pub fn start_server() -> Arc<InMemoryServer> {
    init_tracing();
    InMemoryServer::start(format!("test-{}", uuid::Uuid::new_v4()))
}

pub async fn connect(server: &InMemoryServer) -> Connection {
    Connection::open(&server.address(), None)
        .await
        .expect("Failed to connect to test server")
}

/// Create `database` and commit [`SOCIAL_SCHEMA`] into it.
pub async fn create_social_database(connection: &Connection, database: &str) {
    connection.databases().create(database).await.unwrap();
    let session = Session::open(
        &connection.databases(),
        database,
        SessionType::Schema,
        &Options::new(),
    )
    .await
    .unwrap();
    let tx = session.transaction(TransactionType::Write).await.unwrap();
    tx.query().define(SOCIAL_SCHEMA, &Options::new()).await.unwrap();
    tx.commit().await.unwrap();
}

/// Insert one person per `(name, age)` pair and commit.
pub async fn insert_people(connection: &Connection, database: &str, people: &[(&str, i64)]) {
    let session = Session::open(
        &connection.databases(),
        database,
        SessionType::Data,
        &Options::new(),
    )
    .await
    .unwrap();
    let tx = session.transaction(TransactionType::Write).await.unwrap();
    for (name, age) in people {
        let query = format!("insert $p isa person, has name \"{}\", has age {};", name, age);
        let inserted = tx.query().insert(&query, &Options::new()).await.unwrap();
        assert_eq!(inserted.drain().await.unwrap(), 1);
    }
    tx.commit().await.unwrap();
}

pub async fn data_session(connection: &Connection, database: &str) -> Session {
    Session::open(
        &connection.databases(),
        database,
        SessionType::Data,
        &Options::new(),
    )
    .await
    .unwrap()
}
