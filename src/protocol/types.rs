use serde::{Deserialize, Serialize};
use std::fmt;

/// Access mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Schema,
    Data,
}

/// Access mode of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Read,
    Write,
}

/// Which Query Manager operation a query was submitted through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Define,
    Undefine,
    Get,
    Fetch,
    Insert,
    Delete,
    Update,
    GetAggregate,
    GetGroup,
    GetGroupAggregate,
}

impl QueryType {
    pub fn is_schema_write(&self) -> bool {
        matches!(self, QueryType::Define | QueryType::Undefine)
    }

    pub fn is_data_write(&self) -> bool {
        matches!(
            self,
            QueryType::Insert | QueryType::Delete | QueryType::Update
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueryType::Define => "define",
            QueryType::Undefine => "undefine",
            QueryType::Get => "get",
            QueryType::Fetch => "fetch",
            QueryType::Insert => "insert",
            QueryType::Delete => "delete",
            QueryType::Update => "update",
            QueryType::GetAggregate => "get aggregate",
            QueryType::GetGroup => "get group",
            QueryType::GetGroupAggregate => "get group aggregate",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Username and password presented when a connection is opened
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
