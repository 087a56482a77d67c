//! Request handlers of the in-memory service
//!
//! Each handler returns the reply for one request; errors are turned into
//! [`Response::Error`] by [`execute_request`].

pub mod connection;
pub mod database;
pub mod logic;
pub mod query;
pub mod session;
pub mod transaction;

use super::InMemoryServer;
use crate::protocol::{Request, Response, ServerError};

/// Execute a unary request.
pub(crate) async fn execute_request(
    server: &InMemoryServer,
    connection_id: &str,
    request: Request,
) -> Response {
    dispatch(server, connection_id, request)
        .await
        .unwrap_or_else(Response::error)
}

async fn dispatch(
    server: &InMemoryServer,
    connection_id: &str,
    request: Request,
) -> Result<Response, ServerError> {
    server.check_running()?;
    if let Request::Connect { credentials } = request {
        return connection::handle_connect(server, credentials);
    }
    server.check_connection(connection_id)?;

    match request {
        Request::Connect { .. } | Request::Disconnect => {
            connection::handle_disconnect(server, connection_id);
            Ok(Response::Ok)
        }

        // ==================== Database Operations ====================
        Request::ListDatabases => database::handle_list_databases(server),
        Request::ContainsDatabase { name } => database::handle_contains_database(server, &name),
        Request::CreateDatabase { name } => database::handle_create_database(server, &name),
        Request::DeleteDatabase { name } => database::handle_delete_database(server, &name),
        Request::DatabaseSchema { name } => database::handle_database_schema(server, &name),

        // ==================== Session Operations ====================
        Request::OpenSession {
            database,
            session_type,
            options,
        } => session::handle_open_session(server, connection_id, &database, session_type, options),
        Request::CloseSession { session_id } => {
            session::handle_close_session(server, connection_id, &session_id);
            Ok(Response::Ok)
        }

        // ==================== Transaction Operations ====================
        Request::OpenTransaction {
            session_id,
            transaction_type,
            options,
        } => {
            transaction::handle_open_transaction(
                server,
                connection_id,
                &session_id,
                transaction_type,
                options,
            )
            .await
        }
        Request::CommitTransaction { tx_id } => {
            transaction::handle_commit_transaction(server, connection_id, &tx_id)
        }
        Request::RollbackTransaction { tx_id } => {
            transaction::handle_rollback_transaction(server, connection_id, &tx_id)
        }
        Request::CloseTransaction { tx_id } => {
            transaction::handle_close_transaction(server, connection_id, &tx_id);
            Ok(Response::Ok)
        }

        // ==================== Query Operations ====================
        Request::Query {
            tx_id,
            query_type,
            query,
            options,
        } => query::handle_query(server, connection_id, &tx_id, query_type, &query, &options),
        Request::Explain { .. } => Err(ServerError::new(
            crate::protocol::ServerErrorCode::Internal,
            "Explanations are only available as a stream",
        )),

        // ==================== Logic Operations ====================
        Request::GetRule { tx_id, label } => {
            logic::handle_get_rule(server, connection_id, &tx_id, &label)
        }
        Request::PutRule {
            tx_id,
            label,
            when,
            then,
        } => logic::handle_put_rule(server, connection_id, &tx_id, &label, &when, &then),
        Request::GetRules { .. } => Err(ServerError::new(
            crate::protocol::ServerErrorCode::Internal,
            "Rules are only listed as a stream",
        )),
    }
}

/// Apply a request sent without waiting for a reply.
pub(crate) fn execute_release(server: &InMemoryServer, connection_id: &str, request: Request) {
    match request {
        Request::Disconnect => connection::handle_disconnect(server, connection_id),
        Request::CloseSession { session_id } => {
            session::handle_close_session(server, connection_id, &session_id)
        }
        Request::CloseTransaction { tx_id } => {
            transaction::handle_close_transaction(server, connection_id, &tx_id)
        }
        other => tracing::warn!("Ignoring {} sent as a release", other.name()),
    }
}
