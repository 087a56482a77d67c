use thiserror::Error;

use crate::concept::{ConceptKind, ValueType};
use crate::protocol::ServerError;

/// Coarse classification of a [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The service could not be reached or refused the credentials.
    Connection,
    /// A connection, session, transaction or database was used after closure.
    ClosedResource,
    /// A bad argument was rejected locally, before any network interaction.
    Validation,
    /// A concept or value was requested as the wrong concrete variant.
    ConceptCast,
    /// Unexpected data or an illegal driver state.
    Internal,
    /// Reported verbatim by the remote service.
    Server,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    // Connection errors
    #[error("Unable to connect to '{0}'")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // Closed resources
    #[error("The driver has been closed and no further operation is allowed")]
    DriverClosed,

    #[error("The session has been closed and no further operation is allowed")]
    SessionClosed,

    #[error("The transaction has been closed and no further operation is allowed")]
    TransactionClosed,

    #[error("The transaction has been closed with error(s): {0}")]
    TransactionClosedWithErrors(String),

    #[error("Database '{0}' has been deleted and no further operation is allowed")]
    DatabaseDeleted(String),

    // Validation errors
    #[error("Query cannot be empty")]
    MissingQuery,

    #[error("Database name cannot be empty")]
    MissingDatabaseName,

    #[error("Rule label cannot be empty")]
    MissingRuleLabel,

    #[error("Option '{0}' must be at least 1")]
    PositiveValueRequired(&'static str),

    #[error("The variable '{0}' does not exist")]
    VariableDoesNotExist(String),

    #[error("The concept bound to '{0}' is not explainable")]
    NonexistentExplainableConcept(String),

    #[error("The ownership of attribute '{attribute}' by owner '{owner}' is not explainable")]
    NonexistentExplainableOwnership { owner: String, attribute: String },

    #[error("Read transactions cannot be committed")]
    ReadOnlyCommit,

    // Concept casting errors
    #[error("Invalid concept conversion from '{from}' to '{to}'")]
    InvalidConceptCast { from: ConceptKind, to: ConceptKind },

    #[error("Invalid value conversion from '{from}' to '{to}'")]
    InvalidValueCast { from: ValueType, to: ValueType },

    // Internal errors
    #[error("Unexpected value received from the service: {0}")]
    UnexpectedNativeValue(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Result stream ended without a completion marker")]
    IteratorInvalidated,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Message too large")]
    MessageTooLarge,

    // Server errors
    #[error("{0}")]
    Server(ServerError),
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::ConnectionFailed(_) | DriverError::AuthenticationFailed(_) => {
                ErrorKind::Connection
            }
            DriverError::DriverClosed
            | DriverError::SessionClosed
            | DriverError::TransactionClosed
            | DriverError::TransactionClosedWithErrors(_)
            | DriverError::DatabaseDeleted(_) => ErrorKind::ClosedResource,
            DriverError::MissingQuery
            | DriverError::MissingDatabaseName
            | DriverError::MissingRuleLabel
            | DriverError::PositiveValueRequired(_)
            | DriverError::VariableDoesNotExist(_)
            | DriverError::NonexistentExplainableConcept(_)
            | DriverError::NonexistentExplainableOwnership { .. }
            | DriverError::ReadOnlyCommit => ErrorKind::Validation,
            DriverError::InvalidConceptCast { .. } | DriverError::InvalidValueCast { .. } => {
                ErrorKind::ConceptCast
            }
            DriverError::UnexpectedNativeValue(_)
            | DriverError::IllegalState(_)
            | DriverError::IteratorInvalidated
            | DriverError::Codec(_)
            | DriverError::MessageTooLarge => ErrorKind::Internal,
            DriverError::Server(_) => ErrorKind::Server,
        }
    }

    pub fn is_closed_resource(&self) -> bool {
        self.kind() == ErrorKind::ClosedResource
    }

    /// The server-side failure carried by this error, if any.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            DriverError::Server(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ServerError> for DriverError {
    fn from(error: ServerError) -> Self {
        DriverError::Server(error)
    }
}

impl serde::Serialize for DriverError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerErrorCode;

    #[test]
    fn test_error_messages() {
        let err = DriverError::ConnectionFailed("memory://nowhere".to_string());
        assert_eq!(err.to_string(), "Unable to connect to 'memory://nowhere'");

        let err = DriverError::VariableDoesNotExist("x".to_string());
        assert_eq!(err.to_string(), "The variable 'x' does not exist");

        let err = DriverError::PositiveValueRequired("prefetch_size");
        assert_eq!(err.to_string(), "Option 'prefetch_size' must be at least 1");

        let err = DriverError::InvalidConceptCast {
            from: ConceptKind::EntityType,
            to: ConceptKind::Attribute,
        };
        assert_eq!(
            err.to_string(),
            "Invalid concept conversion from 'EntityType' to 'Attribute'"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(DriverError::DriverClosed.kind(), ErrorKind::ClosedResource);
        assert_eq!(DriverError::SessionClosed.kind(), ErrorKind::ClosedResource);
        assert_eq!(
            DriverError::TransactionClosedWithErrors("boom".into()).kind(),
            ErrorKind::ClosedResource
        );
        assert_eq!(DriverError::MissingQuery.kind(), ErrorKind::Validation);
        assert_eq!(DriverError::ReadOnlyCommit.kind(), ErrorKind::Validation);
        assert_eq!(DriverError::IteratorInvalidated.kind(), ErrorKind::Internal);
        assert_eq!(
            DriverError::AuthenticationFailed("bad password".into()).kind(),
            ErrorKind::Connection
        );
    }

    #[test]
    fn test_server_error_is_surfaced_verbatim() {
        let server = ServerError::new(ServerErrorCode::WriteConflict, "concurrent commit");
        let err = DriverError::from(server.clone());

        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.server_error(), Some(&server));
        assert_eq!(err.to_string(), server.to_string());
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = DriverError::MissingDatabaseName;
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!("Database name cannot be empty"));
    }
}
