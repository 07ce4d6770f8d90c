use tracing_subscriber::EnvFilter;

use crate::infra::{config::LogConfig, error::AppError};

/// Fallback directives when `RUST_LOG` is unset: the configured level is
/// scoped to this crate, dependencies stay at `warn`.
fn default_directives(level: &str) -> String {
    format!("warn,fansync={level}")
}

pub fn init(config: &LogConfig) -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level))),
        )
        .with_target(true)
        .try_init()
        .map_err(AppError::LoggingInit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_scopes_the_level_to_this_crate() {
        assert_eq!(default_directives("debug"), "warn,fansync=debug");
    }

    #[test]
    fn fallback_directives_parse_as_a_filter() {
        assert!(EnvFilter::try_new(default_directives("info")).is_ok());
    }
}
