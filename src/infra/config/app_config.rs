use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub realtime: RealtimeConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

/// Realtime transport tuning. The auth token is deliberately absent: it is
/// issued elsewhere and handed to the connection manager at spawn time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub url: String,
    /// Platform tag sent as the `client` query parameter.
    pub client: String,
    /// Client version string sent as the `version` query parameter.
    pub version: String,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://realtime.example.com/ws".to_owned(),
            client: "desktop".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Messages fetched per history page.
    pub page_size: usize,
    /// Typing-indicator inactivity timeout.
    pub typing_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            typing_timeout_ms: 3_000,
        }
    }
}
