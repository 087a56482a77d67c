use serde::{Deserialize, Serialize};

use super::types::{Credentials, QueryType, SessionType, TransactionType};
use crate::options::Options;

/// Requests that can be sent to the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    /// Open a connection, presenting optional credentials
    Connect { credentials: Option<Credentials> },

    /// Release the connection and everything opened through it
    Disconnect,

    // ==================== Database Operations ====================
    ListDatabases,

    ContainsDatabase { name: String },

    CreateDatabase { name: String },

    DeleteDatabase { name: String },

    /// Dump the schema of a database as define statements
    DatabaseSchema { name: String },

    // ==================== Session Operations ====================
    OpenSession {
        database: String,
        session_type: SessionType,
        options: Options,
    },

    CloseSession { session_id: String },

    // ==================== Transaction Operations ====================
    OpenTransaction {
        session_id: String,
        transaction_type: TransactionType,
        options: Options,
    },

    CommitTransaction { tx_id: String },

    RollbackTransaction { tx_id: String },

    CloseTransaction { tx_id: String },

    // ==================== Query Operations ====================
    Query {
        tx_id: String,
        query_type: QueryType,
        query: String,
        options: Options,
    },

    /// Retrieve the explanations of an inferred answer
    Explain {
        tx_id: String,
        explainable_id: i64,
        options: Options,
    },

    // ==================== Logic Operations ====================
    GetRule { tx_id: String, label: String },

    /// Stream every rule visible to the transaction
    GetRules { tx_id: String },

    /// Define or replace a rule from its `when` and `then` patterns
    PutRule {
        tx_id: String,
        label: String,
        when: String,
        then: String,
    },
}

impl Request {
    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "connect",
            Request::Disconnect => "disconnect",
            Request::ListDatabases => "list_databases",
            Request::ContainsDatabase { .. } => "contains_database",
            Request::CreateDatabase { .. } => "create_database",
            Request::DeleteDatabase { .. } => "delete_database",
            Request::DatabaseSchema { .. } => "database_schema",
            Request::OpenSession { .. } => "open_session",
            Request::CloseSession { .. } => "close_session",
            Request::OpenTransaction { .. } => "open_transaction",
            Request::CommitTransaction { .. } => "commit_transaction",
            Request::RollbackTransaction { .. } => "rollback_transaction",
            Request::CloseTransaction { .. } => "close_transaction",
            Request::Query { .. } => "query",
            Request::Explain { .. } => "explain",
            Request::GetRule { .. } => "get_rule",
            Request::GetRules { .. } => "get_rules",
            Request::PutRule { .. } => "put_rule",
        }
    }
}
