use std::time::Instant;

use uuid::Uuid;

use crate::protocol::{Credentials, Response, ServerError, ServerErrorCode};
use crate::server::InMemoryServer;

pub fn handle_connect(
    server: &InMemoryServer,
    credentials: Option<Credentials>,
) -> Result<Response, ServerError> {
    if !server.accepts(credentials.as_ref()) {
        let user = credentials
            .as_ref()
            .map(|c| c.username().to_string())
            .unwrap_or_else(|| "anonymous".to_string());
        tracing::warn!("[{}] Rejected credentials for {}", server.name(), user);
        return Err(ServerError::new(
            ServerErrorCode::AuthenticationFailed,
            format!("Invalid credentials for user '{}'", user),
        ));
    }

    let connection_id = Uuid::new_v4().to_string();
    server.connections.insert(connection_id.clone(), Instant::now());
    tracing::debug!("[{}] Connection {} opened", server.name(), connection_id);
    Ok(Response::opened(connection_id))
}

pub fn handle_disconnect(server: &InMemoryServer, connection_id: &str) {
    if server.remove_connection(connection_id) {
        tracing::debug!("[{}] Connection {} closed", server.name(), connection_id);
    }
}
