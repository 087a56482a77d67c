use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::options::Options;
use crate::protocol::{Response, ServerError, ServerErrorCode, SessionType, TransactionType};
use crate::server::engine::ExplanationStore;
use crate::server::state::{TransactionEntry, TransactionHandle};
use crate::server::InMemoryServer;

pub async fn handle_open_transaction(
    server: &InMemoryServer,
    connection_id: &str,
    session_id: &str,
    transaction_type: TransactionType,
    options: Options,
) -> Result<Response, ServerError> {
    let session = server.touch_session(connection_id, session_id)?;
    let options = options.merged_over(&session.options);

    let schema_guard = if session.session_type == SessionType::Schema
        && transaction_type == TransactionType::Write
    {
        let wait = options.schema_lock_acquire_timeout_or_default();
        let lock = session.database.schema_lock.clone().lock_owned();
        match tokio::time::timeout(wait, lock).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                return Err(ServerError::new(
                    ServerErrorCode::SchemaLockTimeout,
                    format!(
                        "Schema lock of '{}' not acquired within {}ms",
                        session.database.name,
                        wait.as_millis()
                    ),
                ))
            }
        }
    } else {
        None
    };

    // The session may have been closed while the lock was awaited
    server.touch_session(connection_id, session_id)?;

    let snapshot = session.database.snapshot();
    let tx_id = Uuid::new_v4().to_string();
    let entry = TransactionEntry {
        database: session.database.clone(),
        session_type: session.session_type,
        transaction_type,
        deadline: Instant::now() + options.transaction_timeout_or_default(),
        options,
        graph: snapshot.graph,
        base_version: snapshot.version,
        dirty: false,
        closed: false,
        explanations: ExplanationStore::default(),
        schema_guard,
    };
    server.transactions.insert(
        tx_id.clone(),
        TransactionHandle {
            connection_id: connection_id.to_string(),
            session_id: session_id.to_string(),
            entry: Arc::new(Mutex::new(entry)),
        },
    );

    tracing::debug!(
        "[{}] Transaction {} opened ({:?}) on version {}",
        server.name(),
        tx_id,
        transaction_type,
        snapshot.version
    );
    Ok(Response::opened(tx_id))
}

pub fn handle_commit_transaction(
    server: &InMemoryServer,
    connection_id: &str,
    tx_id: &str,
) -> Result<Response, ServerError> {
    let handle = server.transaction(connection_id, tx_id)?;
    server.transactions.remove(tx_id);

    let mut entry = handle.entry.lock();
    let result = commit(&entry, tx_id);
    entry.close();
    result.map(|version| {
        if let Some(version) = version {
            tracing::info!(
                "[{}] Transaction {} committed {} at version {}",
                server.name(),
                tx_id,
                entry.database.name,
                version
            );
        }
        Response::Ok
    })
}

/// New database version, or `None` when nothing was written.
fn commit(entry: &TransactionEntry, tx_id: &str) -> Result<Option<u64>, ServerError> {
    entry.check_usable(tx_id)?;
    entry.check_writable()?;
    if !entry.dirty {
        return Ok(None);
    }
    entry
        .database
        .commit(entry.base_version, entry.graph.clone())
        .map(Some)
}

pub fn handle_rollback_transaction(
    server: &InMemoryServer,
    connection_id: &str,
    tx_id: &str,
) -> Result<Response, ServerError> {
    let handle = server.transaction(connection_id, tx_id)?;
    server.transactions.remove(tx_id);

    let mut entry = handle.entry.lock();
    let result = entry.check_usable(tx_id);
    entry.close();
    result.map(|_| Response::Ok)
}

pub fn handle_close_transaction(server: &InMemoryServer, connection_id: &str, tx_id: &str) {
    if server.transaction(connection_id, tx_id).is_ok() && server.remove_transaction(tx_id) {
        tracing::debug!("[{}] Transaction {} closed", server.name(), tx_id);
    }
}
