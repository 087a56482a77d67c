//! Databases, sessions and transactions held by the in-memory service

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use super::engine::ExplanationStore;
use super::graph::Graph;
use crate::options::Options;
use crate::protocol::{ServerError, ServerErrorCode, SessionType, TransactionType};

/// Committed state of a database
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub version: u64,
    pub graph: Arc<Graph>,
}

pub(crate) struct DatabaseState {
    pub name: String,
    committed: Mutex<Snapshot>,
    /// Held by the one open schema write transaction
    pub schema_lock: Arc<tokio::sync::Mutex<()>>,
}

impl DatabaseState {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            committed: Mutex::new(Snapshot {
                version: 0,
                graph: Arc::new(Graph::new()),
            }),
            schema_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.committed.lock().clone()
    }

    /// Publish `graph` if nothing was committed since `base_version`.
    pub(crate) fn commit(&self, base_version: u64, graph: Arc<Graph>) -> Result<u64, ServerError> {
        let mut committed = self.committed.lock();
        if committed.version != base_version {
            return Err(ServerError::new(
                ServerErrorCode::WriteConflict,
                format!(
                    "Database '{}' changed since the transaction started (version {} -> {})",
                    self.name, base_version, committed.version
                ),
            ));
        }
        committed.version += 1;
        committed.graph = graph;
        Ok(committed.version)
    }
}

impl std::fmt::Debug for DatabaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseState")
            .field("name", &self.name)
            .field("version", &self.committed.lock().version)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub connection_id: String,
    pub database: Arc<DatabaseState>,
    pub session_type: SessionType,
    pub options: Options,
    pub idle_timeout: Duration,
    pub last_used: Instant,
}

impl SessionEntry {
    pub(crate) fn is_expired(&self) -> bool {
        self.last_used.elapsed() > self.idle_timeout
    }
}

#[derive(Debug)]
pub(crate) struct TransactionEntry {
    pub database: Arc<DatabaseState>,
    pub session_type: SessionType,
    pub transaction_type: TransactionType,
    pub options: Options,
    /// Working copy; shares structure with the snapshot until first written
    pub graph: Arc<Graph>,
    pub base_version: u64,
    pub dirty: bool,
    pub deadline: Instant,
    pub closed: bool,
    pub explanations: ExplanationStore,
    pub schema_guard: Option<OwnedMutexGuard<()>>,
}

impl TransactionEntry {
    /// Fail unless the transaction may still run queries.
    pub(crate) fn check_usable(&self, tx_id: &str) -> Result<(), ServerError> {
        if self.closed {
            return Err(ServerError::new(
                ServerErrorCode::TransactionNotFound,
                format!("Transaction '{}' is closed", tx_id),
            ));
        }
        if Instant::now() > self.deadline {
            return Err(ServerError::new(
                ServerErrorCode::TransactionTimeout,
                format!("Transaction '{}' exceeded its timeout", tx_id),
            ));
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> Result<(), ServerError> {
        if self.transaction_type == TransactionType::Read {
            return Err(ServerError::new(
                ServerErrorCode::ReadOnlyTransaction,
                "Writes are not allowed in a read transaction",
            ));
        }
        Ok(())
    }

    /// Graph for writing; copies the snapshot on first use.
    pub(crate) fn graph_mut(&mut self) -> &mut Graph {
        self.dirty = true;
        Arc::make_mut(&mut self.graph)
    }

    /// Mark closed and give up the schema lock.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.schema_guard = None;
    }
}

pub(crate) type SharedTransaction = Arc<Mutex<TransactionEntry>>;

/// Registry slot of a transaction; owner ids are readable without locking the entry
#[derive(Debug, Clone)]
pub(crate) struct TransactionHandle {
    pub connection_id: String,
    pub session_id: String,
    pub entry: SharedTransaction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_detects_conflict() {
        let db = DatabaseState::new("social");
        let base = db.snapshot();

        assert_eq!(db.commit(base.version, base.graph.clone()).unwrap(), 1);
        let err = db.commit(base.version, base.graph).unwrap_err();
        assert_eq!(err.code, ServerErrorCode::WriteConflict);
        assert_eq!(db.snapshot().version, 1);
    }
}
