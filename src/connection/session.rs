use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::database::DatabaseManager;
use super::transaction::{Transaction, TransactionShared};
use super::unexpected_response;
use crate::error::{DriverError, Result};
use crate::options::Options;
use crate::protocol::{
    Request, Response, ServerError, ServerErrorCode, SessionType, TransactionType,
};
use crate::transport::RpcTransport;

type CloseCallback = Box<dyn FnOnce() + Send>;

pub(crate) struct SessionShared {
    id: String,
    database: String,
    session_type: SessionType,
    options: Options,
    transport: Arc<dyn RpcTransport>,
    open: AtomicBool,
    transactions: Mutex<Vec<Weak<TransactionShared>>>,
    callbacks: Mutex<Vec<CloseCallback>>,
}

impl SessionShared {
    pub(crate) fn database(&self) -> &str {
        &self.database
    }

    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::SessionClosed)
        }
    }

    /// Close every transaction, then the session itself.
    pub(crate) fn close(&self) {
        self.shutdown(true);
    }

    /// Close without telling the service, which already dropped the session.
    pub(crate) fn close_local(&self) {
        self.shutdown(false);
    }

    fn shutdown(&self, notify: bool) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let transactions: Vec<Arc<TransactionShared>> = self
            .transactions
            .lock()
            .drain(..)
            .filter_map(|tx| tx.upgrade())
            .collect();
        for transaction in transactions {
            transaction.close();
        }

        if notify {
            self.transport.release(Request::CloseSession {
                session_id: self.id.clone(),
            });
        }
        tracing::debug!("Closed session {} on {}", self.id, self.database);

        let callbacks: Vec<CloseCallback> = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }
}

/// Context scoping transactions to one database and one access mode
///
/// Dropping a session closes it.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub async fn open(
        databases: &DatabaseManager,
        database: &str,
        session_type: SessionType,
        options: &Options,
    ) -> Result<Self> {
        if database.trim().is_empty() {
            return Err(DriverError::MissingDatabaseName);
        }
        options.validate()?;

        let connection = databases.connection().inner();
        connection.check_open()?;
        let options = options.merged_over(connection.default_options());

        let request = Request::OpenSession {
            database: database.to_string(),
            session_type,
            options: options.clone(),
        };
        let id = match connection.call(request).await? {
            Response::Opened { id } => id,
            other => return Err(unexpected_response("open_session", other)),
        };

        let shared = Arc::new(SessionShared {
            id,
            database: database.to_string(),
            session_type,
            options,
            transport: connection.transport().clone(),
            open: AtomicBool::new(true),
            transactions: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
        });
        connection.register_session(&shared);

        // The connection may have closed while the session was opening
        if connection.check_open().is_err() {
            shared.close();
            return Err(DriverError::DriverClosed);
        }

        tracing::debug!(
            "Opened {:?} session {} on {}",
            session_type,
            shared.id,
            database
        );
        Ok(Self { shared })
    }

    pub fn database_name(&self) -> &str {
        &self.shared.database
    }

    pub fn session_type(&self) -> SessionType {
        self.shared.session_type
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub async fn transaction(&self, transaction_type: TransactionType) -> Result<Transaction> {
        self.transaction_with_options(transaction_type, &Options::new())
            .await
    }

    pub async fn transaction_with_options(
        &self,
        transaction_type: TransactionType,
        options: &Options,
    ) -> Result<Transaction> {
        options.validate()?;
        self.shared.check_open()?;
        let options = options.merged_over(&self.shared.options);
        let timeout = options.transaction_timeout_or_default();

        let request = Request::OpenTransaction {
            session_id: self.shared.id.clone(),
            transaction_type,
            options: options.clone(),
        };
        let response = tokio::time::timeout(timeout, self.shared.transport.call(request))
            .await
            .map_err(|_| {
                DriverError::Server(ServerError::new(
                    ServerErrorCode::TransactionTimeout,
                    format!("Transaction did not open within {}ms", timeout.as_millis()),
                ))
            })??;

        let id = match response {
            Response::Opened { id } => id,
            Response::Error { error } => {
                if matches!(
                    error.code,
                    ServerErrorCode::SessionExpired | ServerErrorCode::SessionNotFound
                ) {
                    tracing::warn!("Session {} is gone on the service: {}", self.shared.id, error);
                    self.shared.close_local();
                }
                return Err(DriverError::Server(error));
            }
            other => return Err(unexpected_response("open_transaction", other)),
        };

        let transaction = Arc::new(TransactionShared::new(
            id,
            transaction_type,
            options,
            self.shared.transport.clone(),
        ));
        {
            let mut transactions = self.shared.transactions.lock();
            transactions.retain(|tx| tx.strong_count() > 0);
            transactions.push(Arc::downgrade(&transaction));
        }

        // The session may have closed while the transaction was opening
        if self.shared.check_open().is_err() {
            transaction.close();
            return Err(DriverError::SessionClosed);
        }

        tracing::debug!("Opened {:?} transaction {}", transaction_type, transaction.id());
        Ok(Transaction::new(transaction))
    }

    /// Register a callback run once when the session closes. Runs
    /// immediately if the session is already closed.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = self.shared.callbacks.lock();
            if self.is_open() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Close the session and its transactions. Calling it again has no effect.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Invalidate this handle and its transactions without notifying the
    /// service, which reclaims the session once it idles out.
    pub fn force_close(&self) {
        self.shared.close_local();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("database", &self.shared.database)
            .field("type", &self.shared.session_type)
            .field("open", &self.is_open())
            .finish()
    }
}
