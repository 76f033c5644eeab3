use std::time::Duration;

use meshforge_core::types::{Credits, DbId};
use meshforge_pipeline::OrchestratorConfig;
use meshforge_provider::PollConfig;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 120;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub proxy_base_url: String,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub user_id: DbId,
    /// Seeds the in-memory balance; ignored with a database.
    pub initial_credits: Option<Credits>,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub http_timeout_secs: u64,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// | Env Var              | Default  |
    /// |----------------------|----------|
    /// | `PROXY_BASE_URL`     | required |
    /// | `DATABASE_URL`       | unset    |
    /// | `USER_ID`            | required |
    /// | `INITIAL_CREDITS`    | unset    |
    /// | `POLL_INTERVAL_SECS` | `5`      |
    /// | `POLL_MAX_ATTEMPTS`  | `120`    |
    /// | `HTTP_TIMEOUT_SECS`  | `30`     |
    /// | `LOG_FORMAT`         | `text`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let proxy_base_url = var("PROXY_BASE_URL").ok_or(ConfigError::Missing("PROXY_BASE_URL"))?;
        let user_id = parse("USER_ID", var("USER_ID"))?.ok_or(ConfigError::Missing("USER_ID"))?;

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            proxy_base_url,
            database_url: var("DATABASE_URL"),
            user_id,
            initial_credits: parse("INITIAL_CREDITS", var("INITIAL_CREDITS"))?,
            poll_interval_secs: parse("POLL_INTERVAL_SECS", var("POLL_INTERVAL_SECS"))?
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            poll_max_attempts: parse("POLL_MAX_ATTEMPTS", var("POLL_MAX_ATTEMPTS"))?
                .unwrap_or(DEFAULT_POLL_MAX_ATTEMPTS),
            http_timeout_secs: parse("HTTP_TIMEOUT_SECS", var("HTTP_TIMEOUT_SECS"))?
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            log_format,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll: PollConfig {
                max_attempts: self.poll_max_attempts,
                interval: Duration::from_secs(self.poll_interval_secs),
            },
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse<T: std::str::FromStr>(
    var: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value: v })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_unset() {
        let config = load(&[("PROXY_BASE_URL", "http://localhost:8787"), ("USER_ID", "7")]).unwrap();

        assert_eq!(config.user_id, 7);
        assert!(config.database_url.is_none());
        assert!(config.initial_credits.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
        let orchestrator = config.orchestrator();
        assert_eq!(orchestrator.poll.max_attempts, 120);
        assert_eq!(orchestrator.poll.interval, Duration::from_secs(5));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PROXY_BASE_URL", "http://proxy"),
            ("USER_ID", "3"),
            ("DATABASE_URL", "postgres://localhost/meshforge"),
            ("INITIAL_CREDITS", "250"),
            ("POLL_INTERVAL_SECS", "2"),
            ("POLL_MAX_ATTEMPTS", "10"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/meshforge"));
        assert_eq!(config.initial_credits, Some(250));
        assert_eq!(config.orchestrator().poll.max_attempts, 10);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn proxy_url_is_required() {
        assert_eq!(
            load(&[("USER_ID", "1")]).unwrap_err(),
            ConfigError::Missing("PROXY_BASE_URL")
        );
    }

    #[test]
    fn blank_user_id_counts_as_missing() {
        assert_eq!(
            load(&[("PROXY_BASE_URL", "http://proxy"), ("USER_ID", " ")]).unwrap_err(),
            ConfigError::Missing("USER_ID")
        );
    }

    #[test]
    fn malformed_number_is_reported() {
        let err = load(&[
            ("PROXY_BASE_URL", "http://proxy"),
            ("USER_ID", "1"),
            ("POLL_MAX_ATTEMPTS", "lots"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "POLL_MAX_ATTEMPTS",
                value: "lots".into()
            }
        );
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let err = load(&[
            ("PROXY_BASE_URL", "http://proxy"),
            ("USER_ID", "1"),
            ("LOG_FORMAT", "xml"),
        ])
        .unwrap_err();
        assert_matches::assert_matches!(err, ConfigError::Invalid { var: "LOG_FORMAT", .. });
    }
}
