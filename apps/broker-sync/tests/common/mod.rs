//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;

use broker_sync::application::ports::{
    TransportConnector, TransportError, TransportEvent, TransportEventSink, TransportHandle,
};
use broker_sync::{ConnectionCredentials, ConnectionSettings};

/// Numeric user id carried by [`jwt`].
pub const USER_ID: u64 = 12345;

/// Unsigned JWT whose `sub` claim is `user_id`.
pub fn jwt(user_id: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{user_id}","name":"trader"}}"#));
    format!("{header}.{payload}.signature")
}

/// Demo credentials for `account` with a decodable access token.
pub fn credentials(account: &str) -> ConnectionCredentials {
    ConnectionCredentials::new(account, jwt(USER_ID), "md-token", true)
}

/// Default settings pointing at fake endpoints.
pub fn settings() -> ConnectionSettings {
    ConnectionSettings {
        demo_ws_url: "wss://demo.test/v1/websocket".to_string(),
        live_ws_url: "wss://live.test/v1/websocket".to_string(),
        ..ConnectionSettings::default()
    }
}

/// One fake socket. Nothing is delivered until the test calls a method.
pub struct FakeSocket {
    url: String,
    sink: TransportEventSink,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
    closed_with: Mutex<Option<(u16, String)>>,
}

impl FakeSocket {
    /// Endpoint passed to `open`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Server accepted the socket.
    pub fn accept(&self) {
        self.open.store(true, Ordering::SeqCst);
        (self.sink)(TransportEvent::Opened);
    }

    /// Deliver one inbound message.
    pub fn deliver(&self, text: &str) {
        (self.sink)(TransportEvent::Message(text.to_string()));
    }

    /// Report a transport error.
    pub fn fail(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        (self.sink)(TransportEvent::Error(reason.to_string()));
    }

    /// Server closed the socket with `code`.
    pub fn server_close(&self, code: u16) {
        self.open.store(false, Ordering::SeqCst);
        (self.sink)(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Messages sent by the client, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Close code and reason sent by the client, if it closed.
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with.lock().clone()
    }
}

impl TransportHandle for FakeSocket {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        self.closed_with
            .lock()
            .get_or_insert_with(|| (code, reason.to_string()));
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.closed_with.lock().is_none()
    }
}

/// Records every socket it opens.
#[derive(Default)]
pub struct FakeConnector {
    sockets: Mutex<Vec<Arc<FakeSocket>>>,
}

impl FakeConnector {
    /// Create a connector with no sockets.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `open` calls so far.
    pub fn opened(&self) -> usize {
        self.sockets.lock().len()
    }

    /// The `index`th socket opened.
    pub fn socket(&self, index: usize) -> Arc<FakeSocket> {
        Arc::clone(&self.sockets.lock()[index])
    }

    /// The most recent socket.
    pub fn last(&self) -> Arc<FakeSocket> {
        let sockets = self.sockets.lock();
        Arc::clone(&sockets[sockets.len() - 1])
    }
}

impl TransportConnector for FakeConnector {
    fn open(&self, url: &str, sink: TransportEventSink) -> Arc<dyn TransportHandle> {
        let socket = Arc::new(FakeSocket {
            url: url.to_string(),
            sink,
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
        });
        self.sockets.lock().push(Arc::clone(&socket));
        socket
    }
}

/// Drive `socket` through authorize and settle until the sync request is
/// out, then acknowledge it with `body`.
pub fn bring_live(
    socket: &FakeSocket,
    scheduler: &broker_sync::ManualScheduler,
    settings: &ConnectionSettings,
    body: &serde_json::Value,
) {
    socket.accept();
    socket.deliver(r#"a[{"s":200,"i":1}]"#);
    scheduler.advance(settings.subscribe_settle);
    let ack = serde_json::json!([{ "s": 200, "i": 10, "d": body }]);
    socket.deliver(&format!("a{ack}"));
}
