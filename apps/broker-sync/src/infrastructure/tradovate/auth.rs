//! Tradovate WebSocket Authentication
//!
//! The socket is authorized by sending `authorize\n1\n\n<accessToken>` as
//! soon as it opens. The server answers with an acknowledgment for id 1:
//! status 200 on success, anything else is a rejection.
//!
//! The user sync request needs the numeric user id, which is the `sub`
//! claim of the access token (a JWT). The token is never verified here; the
//! server does that.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use thiserror::Error;

use super::messages::CommandAck;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The token does not have a JWT payload segment.
    #[error("access token is not a JWT")]
    MalformedToken,

    /// The payload segment is not base64url-encoded JSON.
    #[error("invalid token payload: {0}")]
    InvalidPayload(String),

    /// The payload has no `sub` claim.
    #[error("token payload has no sub claim")]
    MissingSubject,

    /// The `sub` claim is not a positive integer.
    #[error("token sub claim is not numeric: {0}")]
    NonNumericSubject(String),

    /// The server rejected the authorize command.
    #[error("authorization rejected ({status}): {message}")]
    Rejected {
        /// Acknowledgment status.
        status: i64,
        /// Server error text, if any.
        message: String,
    },
}

/// Extract the numeric user id from the access token's `sub` claim.
///
/// # Errors
///
/// Returns an `AuthError` when the token is not a JWT, the payload cannot be
/// decoded, or `sub` is missing or not numeric.
pub fn numeric_user_id(access_token: &str) -> Result<u64, AuthError> {
    let payload = access_token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or(AuthError::MalformedToken)?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidPayload(e.to_string()))?;
    let claims: Value =
        serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidPayload(e.to_string()))?;

    match claims.get("sub") {
        Some(Value::String(sub)) => sub
            .parse()
            .map_err(|_| AuthError::NonNumericSubject(sub.clone())),
        Some(Value::Number(sub)) => sub
            .as_u64()
            .ok_or_else(|| AuthError::NonNumericSubject(sub.to_string())),
        Some(other) => Err(AuthError::NonNumericSubject(other.to_string())),
        None => Err(AuthError::MissingSubject),
    }
}

// =============================================================================
// Authentication State
// =============================================================================

/// Authorization progress on the current socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No authorize sent on this socket.
    #[default]
    Idle,
    /// Authorize sent, waiting for the acknowledgment.
    Pending,
    /// Acknowledged with status 200.
    Authorized,
    /// Acknowledged with an error status.
    Rejected,
}

/// What to do after a rejected authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Reconnect and try again.
    Retry,
    /// Stop; the rejection cap was reached.
    GiveUp,
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// Tracks authorize progress and consecutive rejections across reconnects.
///
/// # Example
///
/// ```rust
/// use broker_sync::infrastructure::tradovate::auth::{AuthDecision, AuthHandler};
/// use broker_sync::infrastructure::tradovate::messages::CommandAck;
///
/// let mut handler = AuthHandler::new(2);
/// handler.on_authorize_sent();
///
/// let rejected = CommandAck { status: 401, id: 1, body: None };
/// assert_eq!(handler.on_ack(&rejected).unwrap_err().1, AuthDecision::Retry);
///
/// handler.on_authorize_sent();
/// assert_eq!(handler.on_ack(&rejected).unwrap_err().1, AuthDecision::GiveUp);
/// ```
#[derive(Debug)]
pub struct AuthHandler {
    state: AuthState,
    failures: u32,
    max_failures: u32,
}

impl AuthHandler {
    /// Create a handler that gives up after `max_failures` consecutive
    /// rejections (0 = never).
    #[must_use]
    pub const fn new(max_failures: u32) -> Self {
        Self {
            state: AuthState::Idle,
            failures: 0,
            max_failures,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Consecutive rejections.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the current socket is authorized.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self.state, AuthState::Authorized)
    }

    /// Record that authorize was sent on a new socket.
    pub const fn on_authorize_sent(&mut self) {
        self.state = AuthState::Pending;
    }

    /// Process the acknowledgment of the authorize command.
    ///
    /// # Errors
    ///
    /// Returns the rejection and whether to retry when the status is not 200.
    pub fn on_ack(&mut self, ack: &CommandAck) -> Result<(), (AuthError, AuthDecision)> {
        if ack.is_ok() {
            self.state = AuthState::Authorized;
            self.failures = 0;
            return Ok(());
        }

        self.state = AuthState::Rejected;
        self.failures = self.failures.saturating_add(1);
        let error = AuthError::Rejected {
            status: ack.status,
            message: ack.error_text().unwrap_or_default(),
        };
        let decision = if self.max_failures > 0 && self.failures >= self.max_failures {
            AuthDecision::GiveUp
        } else {
            AuthDecision::Retry
        };
        Err((error, decision))
    }

    /// Forget socket-level state; rejection count is kept.
    pub const fn on_socket_closed(&mut self) {
        self.state = AuthState::Idle;
    }

    /// Forget everything, including the rejection count.
    pub const fn reset(&mut self) {
        self.state = AuthState::Idle;
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn extracts_string_subject() {
        let token = jwt(&json!({"sub": "424242", "exp": 1_700_000_000}));
        assert_eq!(numeric_user_id(&token), Ok(424_242));
    }

    #[test]
    fn extracts_numeric_subject() {
        let token = jwt(&json!({"sub": 77}));
        assert_eq!(numeric_user_id(&token), Ok(77));
    }

    #[test]
    fn accepts_padded_payload() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"sub":"5"}"#);
        assert_eq!(numeric_user_id(&format!("{header}.{payload}.sig")), Ok(5));
    }

    #[test]
    fn rejects_non_jwt() {
        assert_eq!(numeric_user_id("opaque-token"), Err(AuthError::MalformedToken));
        assert_eq!(numeric_user_id("a..c"), Err(AuthError::MalformedToken));
    }

    #[test]
    fn rejects_bad_payload() {
        assert!(matches!(
            numeric_user_id("a.!!!.c"),
            Err(AuthError::InvalidPayload(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode("not json");
        assert!(matches!(
            numeric_user_id(&format!("a.{not_json}.c")),
            Err(AuthError::InvalidPayload(_))
        ));
    }

    #[test]
    fn rejects_missing_or_non_numeric_subject() {
        assert_eq!(
            numeric_user_id(&jwt(&json!({"name": "x"}))),
            Err(AuthError::MissingSubject)
        );
        assert_eq!(
            numeric_user_id(&jwt(&json!({"sub": "user-1"}))),
            Err(AuthError::NonNumericSubject("user-1".to_string()))
        );
    }

    #[test]
    fn success_resets_failures() {
        let mut handler = AuthHandler::new(5);
        handler.on_authorize_sent();
        let _ = handler.on_ack(&CommandAck {
            status: 401,
            id: 1,
            body: Some(json!("Access is denied")),
        });
        assert_eq!(handler.failures(), 1);
        assert_eq!(handler.state(), AuthState::Rejected);

        handler.on_authorize_sent();
        handler
            .on_ack(&CommandAck {
                status: 200,
                id: 1,
                body: None,
            })
            .unwrap();
        assert!(handler.is_authorized());
        assert_eq!(handler.failures(), 0);
    }

    #[test]
    fn rejection_carries_server_text() {
        let mut handler = AuthHandler::new(0);
        let (error, decision) = handler
            .on_ack(&CommandAck {
                status: 401,
                id: 1,
                body: Some(json!("Access is denied")),
            })
            .unwrap_err();
        assert_eq!(
            error,
            AuthError::Rejected {
                status: 401,
                message: "Access is denied".to_string()
            }
        );
        assert_eq!(decision, AuthDecision::Retry);
    }

    #[test]
    fn unlimited_when_cap_is_zero() {
        let mut handler = AuthHandler::new(0);
        let rejected = CommandAck {
            status: 403,
            id: 1,
            body: None,
        };
        for _ in 0..100 {
            assert_eq!(handler.on_ack(&rejected).unwrap_err().1, AuthDecision::Retry);
        }
    }

    #[test]
    fn socket_close_keeps_failure_count() {
        let mut handler = AuthHandler::new(3);
        let _ = handler.on_ack(&CommandAck {
            status: 401,
            id: 1,
            body: None,
        });
        handler.on_socket_closed();
        assert_eq!(handler.state(), AuthState::Idle);
        assert_eq!(handler.failures(), 1);

        handler.reset();
        assert_eq!(handler.failures(), 0);
    }
}
