//! Transport seam between this core and the vendor protocol layer
//!
//! The wire format stays opaque here: implementations decode provider
//! frames into [`Inbound`] items and map provider failures into
//! [`TransportError`], which the session treats uniformly as retryable.

use async_trait::async_trait;
use bytes::Bytes;

use crate::audio::MessageId;
use crate::error::TransportError;

/// One decoded item from the backend stream
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Audio bytes belonging to a logical message
    Audio { message_id: MessageId, data: Bytes },

    /// The backend began producing a response
    TurnStarted { message_id: MessageId },

    /// The backend finished the current response turn
    TurnComplete { message_id: MessageId },
}

/// Connection factory. `connect` is called for the initial attempt and
/// again on every retry; each call must yield a fresh connection.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn connect(&mut self) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open stream to the backend
#[async_trait]
pub trait Connection: Send {
    /// Next inbound item. `Ok(None)` is a clean end of stream; the
    /// session handles it like any other retryable disconnect.
    ///
    /// Cancel safety: the session races this call against its command
    /// queue in `select!`, so the returned future may be dropped before
    /// it completes. Implementations must not lose an inbound item when
    /// that happens, the same guarantee `tokio::sync::mpsc::Receiver::recv`
    /// gives.
    async fn receive(&mut self) -> Result<Option<Inbound>, TransportError>;

    /// Sends one user text message on the open stream.
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Closes the send direction. Best effort.
    async fn close(&mut self);
}
