//! Transport Port (Driven Port)
//!
//! One websocket attempt per `open` call. The connector reports lifecycle
//! and inbound text through an event sink; the connection tags each sink
//! with the attempt it belongs to so late events from a discarded socket
//! can be ignored.

use std::sync::Arc;

/// Close code for a deliberate, clean shutdown.
pub const NORMAL_CLOSE: u16 = 1000;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is open and writable.
    Opened,
    /// One inbound text message.
    Message(String),
    /// The socket failed.
    Error(String),
    /// The socket closed.
    Closed {
        /// Close code (1006 when the peer vanished without one).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Receiver of transport events.
pub type TransportEventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The socket is not open.
    #[error("transport is not open")]
    NotOpen,

    /// The outbound queue rejected the message.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// A single open (or opening) socket.
pub trait TransportHandle: Send + Sync {
    /// Queue one text message.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotOpen` before `Opened` or after close.
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Close the socket. Calling it more than once is harmless.
    fn close(&self, code: u16, reason: &str);

    /// Whether the socket is open and writable.
    fn is_open(&self) -> bool;
}

/// Port that opens sockets.
///
/// Implementations must deliver events from another task or thread, never
/// from inside `open` itself, and must deliver them in arrival order.
pub trait TransportConnector: Send + Sync {
    /// Begin connecting to `url`, reporting through `sink`.
    fn open(&self, url: &str, sink: TransportEventSink) -> Arc<dyn TransportHandle>;
}
