//! WebSocket Transport
//!
//! [`TungsteniteConnector`] runs each socket on its own tokio task. The task
//! owns the split stream, forwards inbound text to the event sink in arrival
//! order, and drains an outbound queue fed by [`TungsteniteHandle`], so
//! `send` and `close` never block the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::application::ports::{
    TransportConnector, TransportError, TransportEvent, TransportEventSink, TransportHandle,
};

/// Close code reported when the stream ended without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

/// Close code reported when the peer sent a close frame without a code.
const NO_STATUS_CLOSE: u16 = 1005;

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

// =============================================================================
// Handle
// =============================================================================

/// Caller side of one socket.
#[derive(Debug)]
pub struct TungsteniteHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl TransportHandle for TungsteniteHandle {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Outbound::Text(text.to_string()))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn close(&self, code: u16, reason: &str) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens Tradovate sockets with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    runtime: Handle,
}

impl TungsteniteConnector {
    /// Create a connector that spawns socket tasks on `runtime`.
    #[must_use]
    pub const fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl TransportConnector for TungsteniteConnector {
    fn open(&self, url: &str, sink: TransportEventSink) -> Arc<dyn TransportHandle> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));

        self.runtime.spawn(run_socket(
            url.to_string(),
            sink,
            outbound_rx,
            Arc::clone(&open),
            Arc::clone(&closing),
        ));

        Arc::new(TungsteniteHandle {
            outbound: outbound_tx,
            open,
            closing,
        })
    }
}

/// Drive one socket until it closes, fails, or the handle is dropped.
async fn run_socket(
    url: String,
    sink: TransportEventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    tracing::debug!(url = %url, "Opening websocket");

    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Websocket connect failed");
            sink(TransportEvent::Error(e.to_string()));
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    if closing.load(Ordering::SeqCst) {
        tracing::debug!(url = %url, "Socket closed before open completed");
        let _ = write.close().await;
        return;
    }

    open.store(true, Ordering::SeqCst);
    sink(TransportEvent::Opened);

    loop {
        tokio::select! {
            command = outbound.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            open.store(false, Ordering::SeqCst);
                            sink(TransportEvent::Error(e.to_string()));
                            return;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        open.store(false, Ordering::SeqCst);
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        let _ = write.close().await;
                        sink(TransportEvent::Closed { code, reason });
                        return;
                    }
                    None => {
                        open.store(false, Ordering::SeqCst);
                        let _ = write.close().await;
                        return;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        sink(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Ok(text) = String::from_utf8(data.to_vec()) {
                            sink(TransportEvent::Message(text));
                        } else {
                            tracing::warn!(len = data.len(), "Received non-UTF8 binary message");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        open.store(false, Ordering::SeqCst);
                        let (code, reason) = frame.map_or_else(
                            || (NO_STATUS_CLOSE, String::new()),
                            |f| (u16::from(f.code), f.reason.to_string()),
                        );
                        tracing::info!(code, reason = %reason, "Server sent close frame");
                        sink(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        open.store(false, Ordering::SeqCst);
                        sink(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        open.store(false, Ordering::SeqCst);
                        sink(TransportEvent::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: String::new(),
                        });
                        return;
                    }
                }
            }
        }
    }
}
