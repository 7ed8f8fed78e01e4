//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Settings shared by every executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Network timeout for a single request or mail submission.
    pub timeout: Duration,
    /// Minimum interval between two actions of one executor instance.
    pub rate_limit_delay: Duration,
    /// Failed attempts allowed per subscriber before giving up.
    pub max_attempts: u32,
    /// Evaluate every check but never touch the network.
    pub dry_run: bool,
    /// Sent as `User-Agent` on HTTP requests.
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            rate_limit_delay: Duration::from_secs(2),
            max_attempts: 3,
            dry_run: false,
            user_agent: format!("unsubscriber/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Patterns the safety validator blocks or warns on.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Tokens that block a target when found in its path or query.
    pub dangerous_tokens: Vec<String>,
    /// File extensions that block a target when its path ends with one.
    pub blocked_extensions: Vec<String>,
    /// Hosts that only produce a warning.
    pub shortener_hosts: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dangerous_tokens: vec!["delete".into(), "destroy".into(), "remove-account".into()],
            blocked_extensions: vec![".exe".into(), ".zip".into(), ".dmg".into()],
            shortener_hosts: [
                "bit.ly",
                "tinyurl.com",
                "t.co",
                "goo.gl",
                "ow.ly",
                "s.id",
                "j.mp",
                "buff.ly",
                "dlvr.it",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Mail submission endpoint for the mail-reply executor.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".into(),
            port: 587,
        }
    }
}

/// Batch and storage settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Messages (or subscribers) handled per chunk.
    pub batch_size: usize,
    /// Location of the libSQL database file.
    pub db_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            db_path: PathBuf::from("./data/unsubscriber.db"),
        }
    }
}

/// Everything the binary needs, assembled from defaults and `UNSUB_*` variables.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub executor: ExecutorConfig,
    pub safety: SafetyConfig,
    pub smtp: SmtpConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "UNSUB_TIMEOUT_SECS")? {
            config.executor.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<f64, _>(&lookup, "UNSUB_RATE_LIMIT_SECS")? {
            config.executor.rate_limit_delay =
                Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
                    key: "UNSUB_RATE_LIMIT_SECS".into(),
                    message: format!("{secs} is not a usable delay: {e}"),
                })?;
        }
        if let Some(max) = parse_var::<u32, _>(&lookup, "UNSUB_MAX_ATTEMPTS")? {
            config.executor.max_attempts = max;
        }
        if let Some(agent) = lookup("UNSUB_USER_AGENT").filter(|s| !s.trim().is_empty()) {
            config.executor.user_agent = agent;
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "UNSUB_BATCH_SIZE")? {
            if size == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "UNSUB_BATCH_SIZE".into(),
                    message: "must be at least 1".into(),
                });
            }
            config.pipeline.batch_size = size;
        }
        if let Some(path) = lookup("UNSUB_DB_PATH").filter(|s| !s.trim().is_empty()) {
            config.pipeline.db_path = PathBuf::from(path);
        }
        if let Some(host) = lookup("UNSUB_SMTP_HOST").filter(|s| !s.trim().is_empty()) {
            config.smtp.host = host;
        }
        if let Some(port) = parse_var::<u16, _>(&lookup, "UNSUB_SMTP_PORT")? {
            config.smtp.port = port;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.executor.timeout, Duration::from_secs(30));
        assert_eq!(config.executor.rate_limit_delay, Duration::from_secs(2));
        assert_eq!(config.executor.max_attempts, 3);
        assert!(!config.executor.dry_run);
        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(config.smtp.port, 587);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("UNSUB_TIMEOUT_SECS", "5"),
            ("UNSUB_RATE_LIMIT_SECS", "0.5"),
            ("UNSUB_MAX_ATTEMPTS", "7"),
            ("UNSUB_BATCH_SIZE", "10"),
            ("UNSUB_SMTP_HOST", "mail.example.com"),
            ("UNSUB_SMTP_PORT", "2525"),
        ]))
        .unwrap();

        assert_eq!(config.executor.timeout, Duration::from_secs(5));
        assert_eq!(config.executor.rate_limit_delay, Duration::from_millis(500));
        assert_eq!(config.executor.max_attempts, 7);
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.smtp.host, "mail.example.com");
        assert_eq!(config.smtp.port, 2525);
    }

    #[test]
    fn garbage_value_is_rejected_with_key() {
        let err = AppConfig::from_lookup(lookup_from(&[("UNSUB_MAX_ATTEMPTS", "lots")]))
            .unwrap_err();
        let ConfigError::InvalidValue { key, .. } = err;
        assert_eq!(key, "UNSUB_MAX_ATTEMPTS");
    }

    #[test]
    fn out_of_range_rate_limit_is_rejected() {
        for raw in ["1e20", "-1", "NaN", "inf"] {
            let err = AppConfig::from_lookup(lookup_from(&[("UNSUB_RATE_LIMIT_SECS", raw)]))
                .unwrap_err();
            let ConfigError::InvalidValue { key, .. } = err;
            assert_eq!(key, "UNSUB_RATE_LIMIT_SECS", "{raw}");
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("UNSUB_BATCH_SIZE", "0")])).is_err());
    }
}
