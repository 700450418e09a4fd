//! Websocket Token Service Client
//!
//! Fetches per-account Tradovate credentials from the backend:
//! `POST {base}/broker/websockettoken?user_id=..&broker_account_id=..`.
//! The body is `{id?, access_token, md_access_token, is_demo}`, or `null`
//! when no token has been issued for the account.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::{TokenFetchError, TokenSource};
use crate::domain::connection::ConnectionCredentials;

/// Token endpoint path below the service base URL.
pub const TOKEN_PATH: &str = "/broker/websockettoken";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    md_access_token: String,
    #[serde(default)]
    is_demo: bool,
}

/// [`TokenSource`] backed by the token service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenSource {
    client: Client,
    base_url: String,
}

impl HttpTokenSource {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `TokenFetchError::Request` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TokenFetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenFetchError::Request {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_credentials(
        &self,
        user_id: &str,
        broker_account_id: &str,
    ) -> Result<ConnectionCredentials, TokenFetchError> {
        let url = format!("{}{TOKEN_PATH}", self.base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("user_id", user_id), ("broker_account_id", broker_account_id)])
            .send()
            .await
            .map_err(|e| TokenFetchError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenFetchError::Request {
                message: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(TokenFetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let not_issued = || TokenFetchError::NotIssued {
            broker_account_id: broker_account_id.to_string(),
        };
        if body.trim().is_empty() {
            return Err(not_issued());
        }

        let token: Option<TokenResponse> =
            serde_json::from_str(&body).map_err(|e| TokenFetchError::InvalidResponse {
                message: e.to_string(),
            })?;
        let token = token
            .filter(|t| !t.access_token.is_empty())
            .ok_or_else(not_issued)?;

        tracing::debug!(
            broker_account_id,
            is_demo = token.is_demo,
            "Fetched websocket credentials"
        );

        Ok(ConnectionCredentials::new(
            broker_account_id,
            token.access_token,
            token.md_access_token,
            token.is_demo,
        ))
    }
}
