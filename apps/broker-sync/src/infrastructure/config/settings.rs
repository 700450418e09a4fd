//! Broker Sync Configuration Settings
//!
//! Configuration types for the sync daemon, loaded from environment variables.

use std::time::Duration;

use crate::infrastructure::tradovate::messages::{DEMO_WS_URL, LIVE_WS_URL};

/// Per-connection timing and endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Interval between client heartbeats.
    pub heartbeat_interval: Duration,
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Delay between authorize and the user sync request.
    pub subscribe_settle: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Consecutive authorize rejections before giving up (0 = unlimited).
    pub max_auth_failures: u32,
    /// Demo environment WebSocket endpoint.
    pub demo_ws_url: String,
    /// Live environment WebSocket endpoint.
    pub live_ws_url: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(25),
            reconnect_delay: Duration::from_millis(1500),
            subscribe_settle: Duration::from_millis(500),
            max_reconnect_attempts: 0,
            max_auth_failures: 5,
            demo_ws_url: DEMO_WS_URL.to_string(),
            live_ws_url: LIVE_WS_URL.to_string(),
        }
    }
}

impl ConnectionSettings {
    /// Endpoint for the demo or live environment.
    #[must_use]
    pub fn ws_url(&self, is_demo: bool) -> &str {
        if is_demo {
            &self.demo_ws_url
        } else {
            &self.live_ws_url
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Application user whose broker accounts are synced.
    pub user_id: String,
    /// Broker account ids to open connections for.
    pub broker_account_ids: Vec<String>,
    /// Base URL of the token service.
    pub token_service_url: String,
    /// Interval between merge-and-notify passes.
    pub aggregation_tick: Duration,
    /// Server port settings.
    pub server: ServerSettings,
    /// Connection settings.
    pub connection: ConnectionSettings,
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let user_id = required(&lookup, "BROKER_SYNC_USER_ID")?;
        let token_service_url = required(&lookup, "BROKER_SYNC_TOKEN_SERVICE_URL")?
            .trim_end_matches('/')
            .to_string();

        let broker_account_ids: Vec<String> = required(&lookup, "BROKER_SYNC_ACCOUNT_IDS")?
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect();
        if broker_account_ids.is_empty() {
            return Err(ConfigError::EmptyValue("BROKER_SYNC_ACCOUNT_IDS".to_string()));
        }

        let defaults = ConnectionSettings::default();
        let connection = ConnectionSettings {
            heartbeat_interval: parse_duration_millis(
                &lookup,
                "BROKER_SYNC_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            ),
            reconnect_delay: parse_duration_millis(
                &lookup,
                "BROKER_SYNC_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            ),
            subscribe_settle: parse_duration_millis(
                &lookup,
                "BROKER_SYNC_SUBSCRIBE_SETTLE_MS",
                defaults.subscribe_settle,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "BROKER_SYNC_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            max_auth_failures: parse_or(
                &lookup,
                "BROKER_SYNC_MAX_AUTH_FAILURES",
                defaults.max_auth_failures,
            ),
            demo_ws_url: lookup("TRADOVATE_DEMO_WS_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.demo_ws_url),
            live_ws_url: lookup("TRADOVATE_LIVE_WS_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.live_ws_url),
        };

        let server = ServerSettings {
            health_port: parse_or(
                &lookup,
                "BROKER_SYNC_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            user_id,
            broker_account_ids,
            token_service_url,
            aggregation_tick: parse_duration_millis(
                &lookup,
                "BROKER_SYNC_AGGREGATION_TICK_MS",
                Duration::from_millis(100),
            ),
            server,
            connection,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("BROKER_SYNC_USER_ID", "user-1"),
        ("BROKER_SYNC_ACCOUNT_IDS", "acct-b, acct-a,,"),
        ("BROKER_SYNC_TOKEN_SERVICE_URL", "http://tokens.local/"),
    ];

    #[test]
    fn connection_settings_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(settings.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(settings.subscribe_settle, Duration::from_millis(500));
        assert_eq!(settings.max_reconnect_attempts, 0);
        assert_eq!(settings.max_auth_failures, 5);
        assert_eq!(settings.ws_url(true), DEMO_WS_URL);
        assert_eq!(settings.ws_url(false), LIVE_WS_URL);
    }

    #[test]
    fn server_settings_defaults() {
        assert_eq!(ServerSettings::default().health_port, 8083);
    }

    #[test]
    fn loads_required_values_with_defaults() {
        let config = SyncConfig::from_lookup(lookup_from(&REQUIRED)).unwrap();
        assert_eq!(config.user_id, "user-1");
        assert_eq!(config.broker_account_ids, vec!["acct-b", "acct-a"]);
        assert_eq!(config.token_service_url, "http://tokens.local");
        assert_eq!(config.aggregation_tick, Duration::from_millis(100));
        assert_eq!(config.connection, ConnectionSettings::default());
    }

    #[test]
    fn overrides_are_applied() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("BROKER_SYNC_HEALTH_PORT", "9000"),
            ("BROKER_SYNC_HEARTBEAT_INTERVAL_MS", "1000"),
            ("BROKER_SYNC_RECONNECT_DELAY_MS", "50"),
            ("BROKER_SYNC_SUBSCRIBE_SETTLE_MS", "10"),
            ("BROKER_SYNC_AGGREGATION_TICK_MS", "20"),
            ("BROKER_SYNC_MAX_RECONNECT_ATTEMPTS", "3"),
            ("BROKER_SYNC_MAX_AUTH_FAILURES", "0"),
            ("TRADOVATE_DEMO_WS_URL", "ws://127.0.0.1:9999"),
        ]);
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.server.health_port, 9000);
        assert_eq!(config.aggregation_tick, Duration::from_millis(20));
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.connection.reconnect_delay, Duration::from_millis(50));
        assert_eq!(config.connection.subscribe_settle, Duration::from_millis(10));
        assert_eq!(config.connection.max_reconnect_attempts, 3);
        assert_eq!(config.connection.max_auth_failures, 0);
        assert_eq!(config.connection.ws_url(true), "ws://127.0.0.1:9999");
        assert_eq!(config.connection.ws_url(false), LIVE_WS_URL);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("BROKER_SYNC_HEALTH_PORT", "not-a-port"));
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn missing_user_id_is_an_error() {
        let err = SyncConfig::from_lookup(lookup_from(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "BROKER_SYNC_USER_ID"));
    }

    #[test]
    fn blank_account_list_is_an_error() {
        let pairs = [
            ("BROKER_SYNC_USER_ID", "user-1"),
            ("BROKER_SYNC_ACCOUNT_IDS", " , ,"),
            ("BROKER_SYNC_TOKEN_SERVICE_URL", "http://tokens.local"),
        ];
        let err = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "BROKER_SYNC_ACCOUNT_IDS"));
    }
}
