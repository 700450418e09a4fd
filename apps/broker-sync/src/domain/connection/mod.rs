//! Connection Lifecycle Types
//!
//! State, status and credentials for one broker-account connection.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ─► Connecting ─► Authenticating ─► Syncing ─► Live
//!                     ▲                                        │
//!                     └──────────── Reconnecting ◄─────────────┘
//!                            (from any active state)
//! ```
//!
//! Any state may drop to `Disconnected` on an explicit disconnect or after
//! the authentication-failure cap is reached.

use serde::Serialize;

/// Application-level broker account identifier (not the broker's numeric id).
pub type BrokerAccountId = String;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of one broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport, no timers.
    #[default]
    Disconnected,
    /// Transport open requested.
    Connecting,
    /// Transport open, authorize sent.
    Authenticating,
    /// Sync request sent, waiting for the initial entity set.
    Syncing,
    /// Receiving entity events.
    Live,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{
            Authenticating, Connecting, Disconnected, Live, Reconnecting, Syncing,
        };
        match (self, next) {
            (_, Disconnected)
            | (Disconnected | Reconnecting, Connecting)
            | (Connecting, Authenticating)
            | (Authenticating, Syncing)
            | (Syncing, Live)
            | (Connecting | Authenticating | Syncing | Live, Reconnecting) => true,
            _ => false,
        }
    }

    /// Whether a transport is open or being opened.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Syncing | Self::Live
        )
    }

    /// Lowercase name used in logs, metrics and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Syncing => "syncing",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// Observable status of one connection, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnects scheduled since the connection last went live.
    pub reconnect_attempts: u32,
    /// Consecutive authorize rejections.
    pub auth_failures: u32,
    /// Most recent error, cleared on reaching `Live`.
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    /// Whether the connection is receiving entity events.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.state, ConnectionState::Live)
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Tokens for one broker account, fixed for the lifetime of a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredentials {
    /// Which account these tokens belong to.
    pub broker_account_id: BrokerAccountId,
    /// Trading API access token (a JWT).
    pub access_token: String,
    /// Market data access token.
    pub md_access_token: String,
    /// Demo or live environment.
    pub is_demo: bool,
}

impl ConnectionCredentials {
    /// Create credentials.
    #[must_use]
    pub fn new(
        broker_account_id: impl Into<BrokerAccountId>,
        access_token: impl Into<String>,
        md_access_token: impl Into<String>,
        is_demo: bool,
    ) -> Self {
        Self {
            broker_account_id: broker_account_id.into(),
            access_token: access_token.into(),
            md_access_token: md_access_token.into(),
            is_demo,
        }
    }
}

impl std::fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("broker_account_id", &self.broker_account_id)
            .field("access_token", &"[REDACTED]")
            .field("md_access_token", &"[REDACTED]")
            .field("is_demo", &self.is_demo)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    use ConnectionState::{Authenticating, Connecting, Disconnected, Live, Reconnecting, Syncing};

    #[test_case(Disconnected, Connecting, true)]
    #[test_case(Connecting, Authenticating, true)]
    #[test_case(Authenticating, Syncing, true)]
    #[test_case(Syncing, Live, true)]
    #[test_case(Live, Reconnecting, true)]
    #[test_case(Authenticating, Reconnecting, true)]
    #[test_case(Reconnecting, Connecting, true)]
    #[test_case(Live, Disconnected, true)]
    #[test_case(Reconnecting, Disconnected, true)]
    #[test_case(Connecting, Syncing, false ; "never skips authenticating")]
    #[test_case(Disconnected, Live, false)]
    #[test_case(Disconnected, Reconnecting, false)]
    #[test_case(Reconnecting, Live, false)]
    #[test_case(Live, Connecting, false)]
    fn transitions(from: ConnectionState, to: ConnectionState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn active_states() {
        assert!(!Disconnected.is_active());
        assert!(!Reconnecting.is_active());
        assert!(Connecting.is_active());
        assert!(Live.is_active());
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Syncing).unwrap(), "\"syncing\"");
        assert_eq!(Live.to_string(), "live");
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = ConnectionCredentials::new("acct-1", "jwt-secret", "md-secret", true);
        let debug = format!("{creds:?}");
        assert!(!debug.contains("jwt-secret"));
        assert!(!debug.contains("md-secret"));
        assert!(debug.contains("acct-1"));
        assert!(debug.contains("[REDACTED]"));
    }
}
