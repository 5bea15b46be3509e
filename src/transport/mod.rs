//! Event transport
//!
//! A transport moves serialized media events between the client and the
//! engine. It is an [`EventTransport`] trait object so applications can bring
//! their own signaling channel. [`PhoenixTransport`] speaks the Phoenix
//! channels protocol the engine ships with.

pub mod phoenix;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use phoenix::PhoenixTransport;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A serialized media event arrived.
    Event(String),
    /// The connection failed after it was established.
    Error(String),
    /// The remote side closed the connection.
    Closed,
}

/// Channel on which a transport reports [`TransportEvent`]s.
pub type TransportHandler = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open the connection. Resolves once the transport is ready to send.
    async fn connect(&self, handler: TransportHandler) -> Result<(), TransportError>;

    /// Send one serialized media event.
    async fn send(&self, event: String) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
