//! Token Source Port (Driven Port)
//!
//! Interface for obtaining per-account websocket credentials from the
//! backend token service.

use async_trait::async_trait;

use crate::domain::connection::ConnectionCredentials;

/// Credential fetch error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenFetchError {
    /// The request could not be sent or completed.
    #[error("token request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// The service answered with a non-success status.
    #[error("token service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The service had no token for this account.
    #[error("no websocket token issued for broker account {broker_account_id}")]
    NotIssued {
        /// Account that was requested.
        broker_account_id: String,
    },

    /// The body did not match the expected shape.
    #[error("invalid token response: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },
}

/// Port for fetching websocket credentials.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch credentials for one broker account of `user_id`.
    async fn fetch_credentials(
        &self,
        user_id: &str,
        broker_account_id: &str,
    ) -> Result<ConnectionCredentials, TokenFetchError>;
}
