use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{DriverError, Result};
use crate::options::Options;
use crate::protocol::{Request, Response, ServerError, ServerErrorCode, TransactionType};
use crate::logic::LogicManager;
use crate::query::QueryManager;
use crate::transport::{FrameStream, RpcTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
    /// Closed by the caller, by its session, or by a service error
    Closed,
}

type CloseCallback = Box<dyn FnOnce(Option<DriverError>) + Send>;

/// State shared between a [`Transaction`] and the result streams it created
pub(crate) struct TransactionShared {
    id: String,
    transaction_type: TransactionType,
    options: Options,
    timeout: Duration,
    /// Past this instant the service no longer serves the transaction
    deadline: Instant,
    transport: Arc<dyn RpcTransport>,
    state: Mutex<TransactionState>,
    errors: Mutex<Vec<ServerError>>,
    callbacks: Mutex<Vec<CloseCallback>>,
}

impl TransactionShared {
    pub(crate) fn new(
        id: String,
        transaction_type: TransactionType,
        options: Options,
        transport: Arc<dyn RpcTransport>,
    ) -> Self {
        let timeout = options.transaction_timeout_or_default();
        Self {
            id,
            transaction_type,
            options,
            timeout,
            deadline: Instant::now() + timeout,
            transport,
            state: Mutex::new(TransactionState::Open),
            errors: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_open() {
            if Instant::now() >= self.deadline {
                return Err(self.timed_out());
            }
            return Ok(());
        }
        let errors = self.errors.lock();
        if errors.is_empty() {
            Err(DriverError::TransactionClosed)
        } else {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            Err(DriverError::TransactionClosedWithErrors(messages.join("; ")))
        }
    }

    /// Move out of `Open`; only the first terminal transition succeeds.
    fn terminate(&self, next: TransactionState, error: Option<DriverError>) -> bool {
        {
            let mut state = self.state.lock();
            if *state != TransactionState::Open {
                return false;
            }
            *state = next;
        }
        tracing::debug!("Transaction {} is now {:?}", self.id, next);

        let callbacks: Vec<CloseCallback> = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback(error.clone());
        }
        true
    }

    pub(crate) fn on_close(&self, callback: CloseCallback) {
        {
            let state = self.state.lock();
            if *state == TransactionState::Open {
                self.callbacks.lock().push(callback);
                return;
            }
        }
        callback(None);
    }

    /// Force the transaction closed because the service reported `error`.
    pub(crate) fn fail(&self, error: ServerError) {
        if !self.is_open() {
            return;
        }
        tracing::warn!("Transaction {} closed by service error: {}", self.id, error);
        self.errors.lock().push(error.clone());
        if self.terminate(TransactionState::Closed, Some(DriverError::Server(error))) {
            self.transport.release(Request::CloseTransaction {
                tx_id: self.id.clone(),
            });
        }
    }

    pub(crate) fn close(&self) {
        if self.terminate(TransactionState::Closed, None) {
            self.transport.release(Request::CloseTransaction {
                tx_id: self.id.clone(),
            });
        }
    }

    fn timed_out(&self) -> DriverError {
        let error = ServerError::new(
            ServerErrorCode::TransactionTimeout,
            format!("Transaction exceeded its {}ms timeout", self.timeout.as_millis()),
        );
        self.fail(error.clone());
        DriverError::Server(error)
    }

    /// Unary call bounded by the transaction timeout. A service error fails
    /// the transaction and is returned as `Server`.
    pub(crate) async fn call(&self, request: Request) -> Result<Response> {
        self.check_open()?;
        let response = tokio::time::timeout(self.timeout, self.transport.call(request))
            .await
            .map_err(|_| self.timed_out())??;

        match response {
            Response::Error { error } => {
                self.fail(error.clone());
                Err(DriverError::Server(error))
            }
            response => Ok(response),
        }
    }

    pub(crate) async fn stream(&self, request: Request) -> Result<FrameStream> {
        self.check_open()?;
        tokio::time::timeout(self.timeout, self.transport.stream(request))
            .await
            .map_err(|_| self.timed_out())?
    }
}

/// A unit of work inside a [`Session`](super::Session)
///
/// A transaction leaves the open state exactly once: by commit, rollback or
/// close. Dropping an open transaction closes it and discards its writes.
pub struct Transaction {
    shared: Arc<TransactionShared>,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<TransactionShared>) -> Self {
        Self { shared }
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.shared.transaction_type
    }

    pub fn options(&self) -> &Options {
        self.shared.options()
    }

    pub fn state(&self) -> TransactionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Query surface bound to this transaction
    pub fn query(&self) -> QueryManager<'_> {
        QueryManager::new(&self.shared)
    }

    /// Rule surface bound to this transaction
    pub fn logic(&self) -> LogicManager<'_> {
        LogicManager::new(&self.shared)
    }

    /// Register a callback run once when the transaction leaves the open
    /// state, with the service error that closed it if any. Runs
    /// immediately if the transaction is already closed.
    pub fn on_close(&self, callback: impl FnOnce(Option<DriverError>) + Send + 'static) {
        self.shared.on_close(Box::new(callback));
    }

    /// Persist the writes of this transaction and close it.
    pub async fn commit(&self) -> Result<()> {
        self.shared.check_open()?;
        if self.shared.transaction_type == TransactionType::Read {
            self.shared.close();
            return Err(DriverError::ReadOnlyCommit);
        }

        let request = Request::CommitTransaction {
            tx_id: self.shared.id.clone(),
        };
        match self.shared.call(request).await? {
            Response::Ok => {
                self.shared.terminate(TransactionState::Committed, None);
                tracing::info!("Committed transaction {}", self.shared.id);
                Ok(())
            }
            other => {
                self.shared.close();
                Err(super::unexpected_response("commit_transaction", other))
            }
        }
    }

    /// Discard the writes of this transaction and close it.
    pub async fn rollback(&self) -> Result<()> {
        self.shared.check_open()?;
        let request = Request::RollbackTransaction {
            tx_id: self.shared.id.clone(),
        };
        match self.shared.call(request).await? {
            Response::Ok => {
                self.shared.terminate(TransactionState::RolledBack, None);
                Ok(())
            }
            other => {
                self.shared.close();
                Err(super::unexpected_response("rollback_transaction", other))
            }
        }
    }

    /// Close without committing. Calling it again has no effect.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.shared.id)
            .field("type", &self.shared.transaction_type)
            .field("state", &self.shared.state())
            .finish()
    }
}
