use serde::Deserialize;

use super::app_config::{AppConfig, LogConfig, RealtimeConfig, SessionConfig};

/// On-disk shape of the config file. Every field is optional so a partial
/// file overrides only what it names.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub realtime: Option<FileRealtimeConfig>,
    pub session: Option<FileSessionConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileLogConfig {
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileRealtimeConfig {
    pub url: Option<String>,
    pub client: Option<String>,
    pub version: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub reconnect_max_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileSessionConfig {
    pub page_size: Option<usize>,
    pub typing_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn merge_into(self, base: AppConfig) -> AppConfig {
        AppConfig {
            logging: merge_logging(self.logging, base.logging),
            realtime: merge_realtime(self.realtime, base.realtime),
            session: merge_session(self.session, base.session),
        }
    }
}

fn merge_logging(file: Option<FileLogConfig>, base: LogConfig) -> LogConfig {
    let Some(file) = file else { return base };
    LogConfig {
        level: file.level.unwrap_or(base.level),
    }
}

fn merge_realtime(file: Option<FileRealtimeConfig>, base: RealtimeConfig) -> RealtimeConfig {
    let Some(file) = file else { return base };
    RealtimeConfig {
        url: file.url.unwrap_or(base.url),
        client: file.client.unwrap_or(base.client),
        version: file.version.unwrap_or(base.version),
        connect_timeout_ms: file.connect_timeout_ms.unwrap_or(base.connect_timeout_ms),
        heartbeat_interval_ms: file
            .heartbeat_interval_ms
            .unwrap_or(base.heartbeat_interval_ms),
        reconnect_base_delay_ms: file
            .reconnect_base_delay_ms
            .unwrap_or(base.reconnect_base_delay_ms),
        reconnect_max_delay_ms: file
            .reconnect_max_delay_ms
            .unwrap_or(base.reconnect_max_delay_ms),
        max_reconnect_attempts: file
            .max_reconnect_attempts
            .unwrap_or(base.max_reconnect_attempts),
    }
}

fn merge_session(file: Option<FileSessionConfig>, base: SessionConfig) -> SessionConfig {
    let Some(file) = file else { return base };
    SessionConfig {
        page_size: file.page_size.unwrap_or(base.page_size),
        typing_timeout_ms: file.typing_timeout_ms.unwrap_or(base.typing_timeout_ms),
    }
}
