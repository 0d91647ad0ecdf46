//! The seam between the session manager and the wire.
//!
//! [`Connector`] opens a fully handshaken [`Connection`]; the manager never
//! sees Engine.IO or Socket.IO framing. [`SocketIoConnector`] is the
//! production implementation.

#[cfg(test)]
mod fake;
mod polling;
mod socketio;
mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, TransportKind};
use crate::error::TransportError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::packet::EnginePacket;

pub use socketio::{SocketIoConnection, SocketIoConnector};

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    /// The server closed the namespace on purpose; reconnecting would be
    /// refused the same way.
    ServerDisconnect,
}

#[async_trait]
pub trait Connection: Send {
    async fn emit(&mut self, message: ClientMessage) -> Result<(), TransportError>;

    /// Next inbound event. Must be cancel-safe: the caller races it against
    /// other work in `tokio::select!`.
    async fn recv(&mut self) -> Result<Inbound, TransportError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open Engine.IO session: packets go out through `outbound` and come in
/// through `inbound`. Heartbeat pings are answered by the engine tasks and
/// never surface here.
pub(crate) struct EngineChannel {
    pub outbound: mpsc::UnboundedSender<EnginePacket>,
    pub inbound: mpsc::UnboundedReceiver<Result<EnginePacket, TransportError>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl EngineChannel {
    pub(crate) async fn open(config: &ClientConfig) -> Result<Self, TransportError> {
        match config.transport {
            TransportKind::Polling => polling::open(config).await,
            TransportKind::Websocket => websocket::open(config).await,
        }
    }

    /// Queues a close packet and gives the writer `grace` to flush it.
    pub(crate) async fn close(&mut self, grace: Duration) {
        let _ = self.outbound.send(EnginePacket::Close);
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(grace, &mut writer).await.is_err() {
                debug!("Engine writer did not flush within {grace:?}");
                writer.abort();
            }
        }
        self.abort();
    }

    fn abort(&mut self) {
        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

impl Drop for EngineChannel {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Server silence longer than this means the connection is dead.
pub(crate) fn heartbeat_deadline(ping_interval_ms: u64, ping_timeout_ms: u64) -> Duration {
    Duration::from_millis(ping_interval_ms.saturating_add(ping_timeout_ms))
}
