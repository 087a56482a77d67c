use serde::{Deserialize, Serialize};

use super::error::ServerError;
use super::records::{AnswerRecord, RuleRecord, ValueRecord};

/// Reply to a unary request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Success without a payload
    Ok,

    /// A connection, session or transaction was opened under this id
    Opened { id: String },

    /// Database listing
    Databases { names: Vec<String> },

    Bool { value: bool },

    Text { value: String },

    /// Result of an aggregate query; empty when nothing was aggregated
    Aggregate {
        #[serde(default)]
        value: Option<ValueRecord>,
    },

    /// A rule looked up or written by label; empty when no rule has it
    Rule {
        #[serde(default)]
        rule: Option<RuleRecord>,
    },

    Error { error: ServerError },
}

impl Response {
    pub fn opened(id: impl Into<String>) -> Self {
        Response::Opened { id: id.into() }
    }

    pub fn error(error: ServerError) -> Self {
        Response::Error { error }
    }
}

/// One element of a streamed answer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFrame {
    Answer(AnswerRecord),
    /// End marker; nothing follows
    Done,
    /// Error marker; nothing follows
    Error(ServerError),
}
