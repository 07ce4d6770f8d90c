use std::path::Path;

use crate::infra::error::AppError;

use super::app_config::AppConfig;
use super::file_config::FileConfig;

const CONFIG_FILE_MISSING: &str = "CONFIG_FILE_MISSING";
const CONFIG_LOADED: &str = "CONFIG_LOADED";

/// Loads the config file and merges it over the built-in defaults.
/// A missing file is not an error: defaults are used as-is.
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        tracing::info!(code = CONFIG_FILE_MISSING, path = %path.display(), "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let file: FileConfig = toml::from_str(&raw).map_err(|source| AppError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    let config = file.merge_into(AppConfig::default());
    validate(&config)?;
    tracing::info!(code = CONFIG_LOADED, path = %path.display(), "config loaded");
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), AppError> {
    if config.realtime.url.is_empty() {
        return Err(AppError::InvalidConfig {
            reason: "realtime.url must not be empty".to_owned(),
        });
    }
    if config.realtime.reconnect_base_delay_ms == 0 {
        return Err(AppError::InvalidConfig {
            reason: "realtime.reconnect_base_delay_ms must be positive".to_owned(),
        });
    }
    if config.realtime.reconnect_max_delay_ms < config.realtime.reconnect_base_delay_ms {
        return Err(AppError::InvalidConfig {
            reason: "realtime.reconnect_max_delay_ms must be at least the base delay".to_owned(),
        });
    }
    if config.realtime.heartbeat_interval_ms == 0 {
        return Err(AppError::InvalidConfig {
            reason: "realtime.heartbeat_interval_ms must be positive".to_owned(),
        });
    }
    if config.session.page_size == 0 {
        return Err(AppError::InvalidConfig {
            reason: "session.page_size must be positive".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("fansync.toml");
        let mut file = std::fs::File::create(&path).expect("create config file");
        file.write_all(contents.as_bytes()).expect("write config");
        path
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
[realtime]
url = "wss://staging.example.com/ws"
max_reconnect_attempts = 8

[session]
page_size = 25
"#,
        );

        let config = load_config(&path).expect("load");
        assert_eq!(config.realtime.url, "wss://staging.example.com/ws");
        assert_eq!(config.realtime.max_reconnect_attempts, 8);
        assert_eq!(config.realtime.reconnect_base_delay_ms, 1_000);
        assert_eq!(config.session.page_size, 25);
        assert_eq!(config.session.typing_timeout_ms, 3_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "not valid toml [[");

        let error = load_config(&path).expect_err("must fail");
        assert!(matches!(error, AppError::ConfigParse { .. }));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "[session]\npage_size = 0\n");

        let error = load_config(&path).expect_err("must fail");
        assert!(matches!(error, AppError::InvalidConfig { .. }));
    }

    #[test]
    fn max_delay_below_base_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "[realtime]\nreconnect_max_delay_ms = 10\n");

        let error = load_config(&path).expect_err("must fail");
        assert!(matches!(error, AppError::InvalidConfig { .. }));
    }
}
