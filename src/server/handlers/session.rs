use std::time::Instant;

use uuid::Uuid;

use crate::options::Options;
use crate::protocol::{Response, ServerError, SessionType};
use crate::server::state::SessionEntry;
use crate::server::InMemoryServer;

pub fn handle_open_session(
    server: &InMemoryServer,
    connection_id: &str,
    database: &str,
    session_type: SessionType,
    options: Options,
) -> Result<Response, ServerError> {
    let database = server.database(database)?;
    let session_id = Uuid::new_v4().to_string();

    tracing::debug!(
        "[{}] Session {} opened on {} ({:?})",
        server.name(),
        session_id,
        database.name,
        session_type
    );
    server.sessions.insert(
        session_id.clone(),
        SessionEntry {
            connection_id: connection_id.to_string(),
            database,
            session_type,
            idle_timeout: options.session_idle_timeout_or_default(),
            options,
            last_used: Instant::now(),
        },
    );
    Ok(Response::opened(session_id))
}

pub fn handle_close_session(server: &InMemoryServer, connection_id: &str, session_id: &str) {
    let owned = server
        .sessions
        .get(session_id)
        .map(|s| s.connection_id == connection_id)
        .unwrap_or(false);
    if owned && server.remove_session(session_id) {
        tracing::debug!("[{}] Session {} closed", server.name(), session_id);
    }
}
