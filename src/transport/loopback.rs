use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{FrameStream, RpcTransport};
use crate::error::{DriverError, Result};
use crate::protocol::{
    decode_message, encode_message, Credentials, Request, Response, ServerErrorCode, StreamFrame,
};
use crate::server::InMemoryServer;

/// Transport to an [`InMemoryServer`] in the same process
///
/// Messages still go through the codec in both directions.
pub struct LoopbackTransport {
    server: Arc<InMemoryServer>,
    connection_id: String,
}

impl LoopbackTransport {
    pub async fn connect(
        server: Arc<InMemoryServer>,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let bytes = encode_message(&Request::Connect { credentials })?;
        let reply = server.handle_message("", &bytes).await;

        match decode_message::<Response>(&reply)? {
            Response::Opened { id } => Ok(Self {
                server,
                connection_id: id,
            }),
            Response::Error { error } if error.code == ServerErrorCode::AuthenticationFailed => {
                Err(DriverError::AuthenticationFailed(error.message))
            }
            Response::Error { error } => Err(DriverError::ConnectionFailed(error.to_string())),
            other => Err(DriverError::UnexpectedNativeValue(format!(
                "unexpected reply to connect: {:?}",
                other
            ))),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

fn frames(receiver: mpsc::Receiver<Vec<u8>>) -> FrameStream {
    Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
        let bytes = receiver.recv().await?;
        Some((decode_message::<StreamFrame>(&bytes), receiver))
    }))
}

#[async_trait]
impl RpcTransport for LoopbackTransport {
    async fn call(&self, request: Request) -> Result<Response> {
        let bytes = encode_message(&request)?;
        let reply = self.server.handle_message(&self.connection_id, &bytes).await;
        decode_message(&reply)
    }

    async fn stream(&self, request: Request) -> Result<FrameStream> {
        let bytes = encode_message(&request)?;
        let receiver = self.server.open_stream(&self.connection_id, &bytes).await;
        Ok(frames(receiver))
    }

    fn release(&self, request: Request) {
        let name = request.name();
        match encode_message(&request) {
            Ok(bytes) => self.server.handle_release(&self.connection_id, &bytes),
            Err(e) => tracing::warn!("Failed to encode {} request: {}", name, e),
        }
    }
}
