//! Tradovate WebSocket Message Types
//!
//! Frame and command types for Tradovate's user-data websocket.
//!
//! # Inbound Frames
//!
//! Every server message starts with a one-character frame type:
//!
//! - `o`: socket open
//! - `h`: server heartbeat, answered with `[]`
//! - `a[...]`: JSON array of items
//!
//! Array items are command acknowledgments (`{"s":200,"i":1,"d":...}`),
//! entity events (`{"e":"props","d":{"entityType":..,"eventType":..,"entity":{..}}}`)
//! or bare initial lists (`{"d":[...]}`).
//!
//! # Outbound Commands
//!
//! Commands are newline-separated: `<topic>\n<id>\n\n<body>`. The authorize
//! command carries the raw access token as its body.

use serde::Serialize;
use serde_json::Value;

use crate::domain::reconciler::SyncEvent;

// =============================================================================
// Constants
// =============================================================================

/// Demo environment endpoint.
pub const DEMO_WS_URL: &str = "wss://demo.tradovateapi.com/v1/websocket";

/// Live environment endpoint.
pub const LIVE_WS_URL: &str = "wss://live.tradovateapi.com/v1/websocket";

/// Request id reserved for the authorize command.
pub const AUTHORIZE_REQUEST_ID: u64 = 1;

/// First id handed out by `MessageIds`.
pub const FIRST_REQUEST_ID: u64 = 10;

/// Client reply to a server heartbeat, also used as the client keep-alive.
pub const HEARTBEAT_ACK: &str = "[]";

/// Topic of the user data sync request.
pub const SYNC_REQUEST_TOPIC: &str = "user/syncrequest";

/// Acknowledgment status for success.
pub const STATUS_OK: i64 = 200;

// =============================================================================
// Inbound
// =============================================================================

/// One decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Socket open notice.
    Open,
    /// Server heartbeat.
    Heartbeat,
    /// Array of items.
    Array(Vec<Value>),
    /// Server close notice `c[code,"reason"]`; the socket close follows.
    Close {
        /// Close code, when numeric.
        code: Option<u16>,
        /// Close reason, empty when absent.
        reason: String,
    },
}

/// Acknowledgment of a client command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    /// HTTP-like status (200 on success).
    pub status: i64,
    /// Id of the acknowledged request.
    pub id: u64,
    /// Response payload, if any.
    pub body: Option<Value>,
}

impl CommandAck {
    /// Whether the command succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Whether this acknowledges the authorize command.
    #[must_use]
    pub const fn is_authorize(&self) -> bool {
        self.id == AUTHORIZE_REQUEST_ID
    }

    /// Error text carried in the body, if any.
    #[must_use]
    pub fn error_text(&self) -> Option<String> {
        match &self.body {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Object(map)) => map
                .get("errorText")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            _ => None,
        }
    }
}

/// One classified array item.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerItem {
    /// Command acknowledgment.
    Ack(CommandAck),
    /// Single entity event.
    Event(SyncEvent),
    /// Initial entity list; every element becomes a `Created` event.
    InitialList(Vec<SyncEvent>),
    /// Anything else.
    Unrecognized(Value),
}

// =============================================================================
// Outbound
// =============================================================================

/// Body of `user/syncrequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRequestBody {
    /// Numeric user ids to sync.
    pub users: Vec<u64>,
}

/// A client command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `authorize\n1\n\n<token>`.
    Authorize {
        /// Access token.
        token: String,
    },
    /// `<topic>\n<id>\n\n<body>`.
    Request {
        /// Endpoint topic.
        topic: String,
        /// Request id.
        id: u64,
        /// JSON body, empty when `None`.
        body: Option<Value>,
    },
    /// `[]`.
    HeartbeatAck,
}

impl Command {
    /// Build the sync request for `user_id`.
    #[must_use]
    pub fn sync_request(id: u64, user_id: u64) -> Self {
        Self::Request {
            topic: SYNC_REQUEST_TOPIC.to_string(),
            id,
            body: serde_json::to_value(SyncRequestBody {
                users: vec![user_id],
            })
            .ok(),
        }
    }
}

/// Strictly increasing request ids, starting above the authorize id.
#[derive(Debug)]
pub struct MessageIds {
    next: u64,
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIds {
    /// Start at `FIRST_REQUEST_ID`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: FIRST_REQUEST_ID,
        }
    }

    /// Take the next id.
    pub const fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}
