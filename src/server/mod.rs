//! In-process query-execution service
//!
//! [`InMemoryServer`] is the remote end that `memory://` addresses reach. It
//! decodes every request with the same codec a network transport would use,
//! keeps databases as versioned graph snapshots and evaluates queries with a
//! small pattern engine.

pub(crate) mod engine;
pub(crate) mod graph;
pub(crate) mod handlers;
pub(crate) mod parser;
pub(crate) mod state;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::options::Options;
use crate::protocol::{
    decode_message, encode_message, Credentials, Request, Response, ServerError, ServerErrorCode,
    SessionType, StreamFrame,
};
use crate::transport::MEMORY_SCHEME;
use state::{DatabaseState, SessionEntry, TransactionHandle};

/// Servers reachable by name through `memory://<name>`
static REGISTRY: Lazy<DashMap<String, Weak<InMemoryServer>>> = Lazy::new(DashMap::new);

/// What a transaction needs to know about its session
#[derive(Debug, Clone)]
pub(crate) struct SessionContext {
    pub database: Arc<DatabaseState>,
    pub session_type: SessionType,
    pub options: Options,
}

pub struct InMemoryServer {
    name: String,
    credentials: Option<Credentials>,
    running: AtomicBool,
    requests: AtomicU64,
    pub(crate) databases: DashMap<String, Arc<DatabaseState>>,
    /// Open connections and when they were opened
    pub(crate) connections: DashMap<String, Instant>,
    pub(crate) sessions: DashMap<String, SessionEntry>,
    pub(crate) transactions: DashMap<String, TransactionHandle>,
}

impl InMemoryServer {
    /// Start a server that accepts any credentials.
    pub fn start(name: impl Into<String>) -> Arc<Self> {
        Self::register(name.into(), None)
    }

    /// Start a server that only accepts `credentials`.
    pub fn start_with_credentials(name: impl Into<String>, credentials: Credentials) -> Arc<Self> {
        Self::register(name.into(), Some(credentials))
    }

    fn register(name: String, credentials: Option<Credentials>) -> Arc<Self> {
        let server = Arc::new(Self {
            name: name.clone(),
            credentials,
            running: AtomicBool::new(true),
            requests: AtomicU64::new(0),
            databases: DashMap::new(),
            connections: DashMap::new(),
            sessions: DashMap::new(),
            transactions: DashMap::new(),
        });
        if let Some(previous) = REGISTRY.insert(name.clone(), Arc::downgrade(&server)) {
            if previous.upgrade().is_some() {
                tracing::warn!("In-memory server '{}' replaced a running server", name);
            }
        }
        tracing::info!("In-memory server started at {}{}", MEMORY_SCHEME, name);
        server
    }

    /// Running server registered under `name`.
    pub fn lookup(name: &str) -> Option<Arc<Self>> {
        REGISTRY
            .get(name)
            .and_then(|weak| weak.upgrade())
            .filter(|server| server.is_running())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address a connection can be opened with.
    pub fn address(&self) -> String {
        format!("{}{}", MEMORY_SCHEME, self.name)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of messages that reached this server.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Stop answering; every later request fails with an unavailable error.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        REGISTRY.remove_if(&self.name, |_, weak| std::ptr::eq(weak.as_ptr(), self));
        let transactions: Vec<String> = self.transactions.iter().map(|t| t.key().clone()).collect();
        for tx_id in transactions {
            self.remove_transaction(&tx_id);
        }
        self.sessions.clear();
        self.connections.clear();
        tracing::info!("In-memory server '{}' shut down", self.name);
    }

    pub(crate) fn accepts(&self, credentials: Option<&Credentials>) -> bool {
        match (&self.credentials, credentials) {
            (None, _) => true,
            (Some(expected), Some(given)) => {
                expected.username() == given.username() && expected.password() == given.password()
            }
            (Some(_), None) => false,
        }
    }

    // ==================== Entry points ====================

    /// Answer one encoded request with one encoded [`Response`].
    pub async fn handle_message(&self, connection_id: &str, data: &[u8]) -> Vec<u8> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let response = match decode_message::<Request>(data) {
            Ok(request) => {
                tracing::trace!("[{}] {} from {}", self.name, request.name(), connection_id);
                handlers::execute_request(self, connection_id, request).await
            }
            Err(e) => Response::error(ServerError::new(ServerErrorCode::Internal, e.to_string())),
        };
        encode_reply(&response, Response::error)
    }

    /// Answer one encoded query request with a stream of encoded [`StreamFrame`]s.
    pub async fn open_stream(&self, connection_id: &str, data: &[u8]) -> mpsc::Receiver<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let request = match decode_message::<Request>(data) {
            Ok(request) => request,
            Err(e) => {
                return error_stream(ServerError::new(ServerErrorCode::Internal, e.to_string()))
            }
        };
        tracing::trace!("[{}] {} stream from {}", self.name, request.name(), connection_id);
        match handlers::query::open_stream(self, connection_id, request) {
            Ok(receiver) => receiver,
            Err(e) => error_stream(e),
        }
    }

    /// Apply a request that expects no reply.
    pub fn handle_release(&self, connection_id: &str, data: &[u8]) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.is_running() {
            return;
        }
        match decode_message::<Request>(data) {
            Ok(request) => handlers::execute_release(self, connection_id, request),
            Err(e) => tracing::warn!("[{}] Undecodable release: {}", self.name, e),
        }
    }

    // ==================== Registry helpers ====================

    pub(crate) fn check_running(&self) -> Result<(), ServerError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ServerError::new(
                ServerErrorCode::Unavailable,
                format!("Server '{}' is not running", self.name),
            ))
        }
    }

    pub(crate) fn check_connection(&self, connection_id: &str) -> Result<(), ServerError> {
        if self.connections.contains_key(connection_id) {
            Ok(())
        } else {
            Err(ServerError::new(
                ServerErrorCode::ConnectionNotFound,
                format!("Connection '{}' is not open", connection_id),
            ))
        }
    }

    pub(crate) fn database(&self, name: &str) -> Result<Arc<DatabaseState>, ServerError> {
        self.databases
            .get(name)
            .map(|db| db.value().clone())
            .ok_or_else(|| {
                ServerError::new(
                    ServerErrorCode::DatabaseNotFound,
                    format!("Database '{}' does not exist", name),
                )
            })
    }

    /// Refresh the idle timer of a session, expiring it if it already ran out.
    pub(crate) fn touch_session(
        &self,
        connection_id: &str,
        session_id: &str,
    ) -> Result<SessionContext, ServerError> {
        let not_found = || {
            ServerError::new(
                ServerErrorCode::SessionNotFound,
                format!("Session '{}' is not open", session_id),
            )
        };
        {
            let Some(mut session) = self.sessions.get_mut(session_id) else {
                return Err(not_found());
            };
            if session.connection_id != connection_id {
                return Err(not_found());
            }
            if !session.is_expired() {
                session.last_used = Instant::now();
                return Ok(SessionContext {
                    database: session.database.clone(),
                    session_type: session.session_type,
                    options: session.options.clone(),
                });
            }
        }
        tracing::info!("[{}] Session {} expired", self.name, session_id);
        self.remove_session(session_id);
        Err(ServerError::new(
            ServerErrorCode::SessionExpired,
            format!("Session '{}' was idle for too long", session_id),
        ))
    }

    /// Transaction `tx_id` opened through `connection_id`.
    pub(crate) fn transaction(
        &self,
        connection_id: &str,
        tx_id: &str,
    ) -> Result<TransactionHandle, ServerError> {
        let handle = self
            .transactions
            .get(tx_id)
            .map(|t| t.value().clone())
            .filter(|t| t.connection_id == connection_id)
            .ok_or_else(|| {
                ServerError::new(
                    ServerErrorCode::TransactionNotFound,
                    format!("Transaction '{}' is not open", tx_id),
                )
            })?;
        if let Some(mut session) = self.sessions.get_mut(&handle.session_id) {
            session.last_used = Instant::now();
        }
        Ok(handle)
    }

    /// Drop a transaction and release its schema lock.
    pub(crate) fn remove_transaction(&self, tx_id: &str) -> bool {
        match self.transactions.remove(tx_id) {
            Some((_, handle)) => {
                handle.entry.lock().close();
                true
            }
            None => false,
        }
    }

    fn remove_transactions_where(&self, predicate: impl Fn(&TransactionHandle) -> bool) {
        let doomed: Vec<String> = self
            .transactions
            .iter()
            .filter(|t| predicate(t.value()))
            .map(|t| t.key().clone())
            .collect();
        for tx_id in doomed {
            self.remove_transaction(&tx_id);
        }
    }

    /// Drop a session together with its transactions.
    pub(crate) fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        self.remove_transactions_where(|t| t.session_id == session_id);
        removed
    }

    /// Drop every session and transaction opened on `database`.
    pub(crate) fn remove_sessions_on(&self, database: &Arc<DatabaseState>) {
        let doomed: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| Arc::ptr_eq(&s.database, database))
            .map(|s| s.key().clone())
            .collect();
        for session_id in doomed {
            self.remove_session(&session_id);
        }
    }

    /// Drop a connection with everything opened through it.
    pub(crate) fn remove_connection(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        self.sessions
            .retain(|_, session| session.connection_id != connection_id);
        self.remove_transactions_where(|t| t.connection_id == connection_id);
        removed
    }
}

impl std::fmt::Debug for InMemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryServer")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("databases", &self.databases.len())
            .field("sessions", &self.sessions.len())
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl Drop for InMemoryServer {
    fn drop(&mut self) {
        let name = self.name.clone();
        REGISTRY.remove_if(&name, |_, weak| weak.strong_count() == 0);
    }
}

/// Encode a reply, falling back to an encoded internal error.
fn encode_reply<T: Serialize>(reply: &T, on_error: impl FnOnce(ServerError) -> T) -> Vec<u8> {
    encode_message(reply).unwrap_or_else(|e| {
        tracing::error!("Failed to encode reply: {}", e);
        let fallback = on_error(ServerError::new(ServerErrorCode::Internal, e.to_string()));
        encode_message(&fallback).unwrap_or_default()
    })
}

pub(crate) fn encode_frame(frame: &StreamFrame) -> Vec<u8> {
    encode_reply(frame, StreamFrame::Error)
}

/// Stream holding a single error frame
pub(crate) fn error_stream(error: ServerError) -> mpsc::Receiver<Vec<u8>> {
    let (sender, receiver) = mpsc::channel(1);
    if sender
        .try_send(encode_frame(&StreamFrame::Error(error)))
        .is_err()
    {
        tracing::error!("Failed to queue an error frame");
    }
    receiver
}
