//! Transport seam between the driver and a query-execution service
//!
//! The driver only speaks [`Request`]s, [`Response`]s and [`StreamFrame`]s;
//! a transport decides how those reach the service.

pub mod loopback;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{DriverError, Result};
use crate::protocol::{Credentials, Request, Response, StreamFrame};
use crate::server::InMemoryServer;

pub use loopback::LoopbackTransport;

/// Address scheme of services running inside this process
pub const MEMORY_SCHEME: &str = "memory://";

/// Frames of one streamed answer, in service order
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame>> + Send>>;

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Unary request/response exchange
    async fn call(&self, request: Request) -> Result<Response>;

    /// Start a query whose answers are streamed back
    async fn stream(&self, request: Request) -> Result<FrameStream>;

    /// Fire-and-forget notification used by the synchronous close paths.
    /// Failures are logged and otherwise ignored.
    fn release(&self, request: Request);
}

/// Resolve `address` and open a transport to it.
pub async fn connect(
    address: &str,
    credentials: Option<Credentials>,
) -> Result<Arc<dyn RpcTransport>> {
    let name = address
        .strip_prefix(MEMORY_SCHEME)
        .ok_or_else(|| DriverError::ConnectionFailed(address.to_string()))?;
    let server = InMemoryServer::lookup(name)
        .ok_or_else(|| DriverError::ConnectionFailed(address.to_string()))?;

    let transport = LoopbackTransport::connect(server, credentials).await?;
    tracing::debug!("Connected to {} as {}", address, transport.connection_id());
    Ok(Arc::new(transport))
}
