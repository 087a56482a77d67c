//! Connection, database, session and transaction handles
//!
//! Handles form a tree: a [`Connection`] owns sessions, a [`Session`] owns
//! transactions, and a [`Transaction`] owns the result streams created in it.
//! Closing a node closes its whole subtree before `close` returns.

pub mod database;
pub mod session;
pub mod transaction;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::config::ConnectionSettings;
use crate::error::{DriverError, Result};
use crate::options::Options;
use crate::protocol::{Credentials, Request, Response};
use crate::transport::{self, RpcTransport};

use session::SessionShared;

pub use database::{Database, DatabaseInfo, DatabaseManager};
pub use session::Session;
pub use transaction::{Transaction, TransactionState};

pub(crate) struct ConnectionInner {
    transport: Arc<dyn RpcTransport>,
    /// Applied under the options of every session opened here
    default_options: Options,
    open: AtomicBool,
    sessions: Mutex<Vec<Weak<SessionShared>>>,
}

impl ConnectionInner {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::DriverClosed)
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub(crate) fn default_options(&self) -> &Options {
        &self.default_options
    }

    /// Unary call outside any transaction; service errors become `Server`.
    pub(crate) async fn call(&self, request: Request) -> Result<Response> {
        self.check_open()?;
        match self.transport.call(request).await? {
            Response::Error { error } => Err(DriverError::Server(error)),
            response => Ok(response),
        }
    }

    pub(crate) fn register_session(&self, session: &Arc<SessionShared>) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(session));
    }

    fn live_sessions(&self) -> Vec<Arc<SessionShared>> {
        self.sessions.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Close every session of this connection opened against `database`.
    pub(crate) fn close_sessions_on(&self, database: &str) {
        for session in self.live_sessions() {
            if session.database() == database {
                session.close_local();
            }
        }
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        for session in self.live_sessions() {
            session.close();
        }
        self.sessions.lock().clear();
        self.transport.release(Request::Disconnect);
        tracing::debug!("Connection closed");
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn unexpected_response(operation: &str, response: Response) -> DriverError {
    DriverError::UnexpectedNativeValue(format!(
        "unexpected reply to {}: {:?}",
        operation, response
    ))
}

/// Top-level handle to a query-execution service
///
/// Clones share the same underlying connection. The connection closes when
/// [`close`](Connection::close) is called or the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect to the service at `address`.
    pub async fn open(address: &str, credentials: Option<Credentials>) -> Result<Self> {
        let transport = transport::connect(address, credentials).await?;
        tracing::info!("Opened connection to {}", address);
        Ok(Self::build(transport, Options::default()))
    }

    pub async fn open_with_settings(settings: &ConnectionSettings) -> Result<Self> {
        settings.options.validate()?;
        let transport = transport::connect(&settings.address, settings.credentials()).await?;
        tracing::info!("Opened connection to {}", settings.address);
        Ok(Self::build(transport, settings.options.clone()))
    }

    /// Wrap an already connected transport.
    pub fn open_with_transport(transport: Arc<dyn RpcTransport>) -> Self {
        Self::build(transport, Options::default())
    }

    fn build(transport: Arc<dyn RpcTransport>, default_options: Options) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                default_options,
                open: AtomicBool::new(true),
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn databases(&self) -> DatabaseManager {
        DatabaseManager::new(self.clone())
    }

    /// Close the connection and every session and transaction opened
    /// through it. Calling it again has no effect.
    pub fn close(&self) {
        self.inner.close();
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .finish()
    }
}
