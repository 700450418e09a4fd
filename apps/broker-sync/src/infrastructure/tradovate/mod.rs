//! Tradovate User-Data Adapters
//!
//! Implements the per-account user-data socket:
//!
//! - **Codec**: Frame prefixes (`o`, `h`, `a[...]`), item classification,
//!   command encoding
//! - **Connection**: Lifecycle state machine with heartbeat, settle and
//!   reconnect timers over an [`EntityReconciler`](crate::domain::reconciler::EntityReconciler)
//! - **Transport**: `tokio-tungstenite` socket tasks
//! - **Token**: Websocket credentials from the token service

pub mod auth;
pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod token;
pub mod transport;

pub use auth::{AuthDecision, AuthError, AuthHandler, AuthState, numeric_user_id};
pub use codec::{CodecError, FrameCodec};
pub use connection::{BrokerConnection, TradovateConnectionFactory};
pub use heartbeat::{Heartbeat, HeartbeatConfig};
pub use messages::{Command, CommandAck, Frame, MessageIds, ServerItem};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use token::HttpTokenSource;
pub use transport::{TungsteniteConnector, TungsteniteHandle};
