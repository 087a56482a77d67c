use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure categories reported by the query-execution service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorCode {
    Unavailable,
    AuthenticationFailed,
    ConnectionNotFound,
    DatabaseNotFound,
    DatabaseAlreadyExists,
    InvalidDatabaseName,
    SessionNotFound,
    SessionExpired,
    TransactionNotFound,
    TransactionTimeout,
    SchemaLockTimeout,
    ReadOnlyTransaction,
    SchemaWriteInDataSession,
    QuerySyntax,
    QueryTypeMismatch,
    TypeNotFound,
    SchemaViolation,
    WriteConflict,
    ExplainableNotFound,
    ArithmeticOverflow,
    Internal,
}

impl ServerErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerErrorCode::Unavailable => "SRV01",
            ServerErrorCode::AuthenticationFailed => "SRV02",
            ServerErrorCode::ConnectionNotFound => "SRV03",
            ServerErrorCode::DatabaseNotFound => "DBS01",
            ServerErrorCode::DatabaseAlreadyExists => "DBS02",
            ServerErrorCode::InvalidDatabaseName => "DBS03",
            ServerErrorCode::SessionNotFound => "SES01",
            ServerErrorCode::SessionExpired => "SES02",
            ServerErrorCode::TransactionNotFound => "TXN01",
            ServerErrorCode::TransactionTimeout => "TXN02",
            ServerErrorCode::SchemaLockTimeout => "TXN03",
            ServerErrorCode::ReadOnlyTransaction => "TXN04",
            ServerErrorCode::SchemaWriteInDataSession => "TXN05",
            ServerErrorCode::WriteConflict => "TXN06",
            ServerErrorCode::QuerySyntax => "QRY01",
            ServerErrorCode::QueryTypeMismatch => "QRY02",
            ServerErrorCode::TypeNotFound => "QRY03",
            ServerErrorCode::SchemaViolation => "QRY04",
            ServerErrorCode::ExplainableNotFound => "QRY05",
            ServerErrorCode::ArithmeticOverflow => "QRY06",
            ServerErrorCode::Internal => "INT01",
        }
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by the service, surfaced to callers unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: ServerErrorCode,
    pub message: String,
}

impl ServerError {
    pub fn new(code: ServerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ServerError {}
