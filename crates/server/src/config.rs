//! Process configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use vaultize_core::parse_duration;

/// A required environment variable was missing or a value failed to
/// parse. Configuration errors exit the process with code 64.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required environment variable '{0}' is not set")]
    Missing(&'static str),

    #[error("invalid value for '{0}': {1}")]
    Invalid(&'static str, String),
}

/// Everything the process reads from its environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// `RULES_DIR` — directory of rule JSON files.
    pub rules_dir: PathBuf,
    /// `STORE_URL` — base URL of the search store.
    pub store_url: String,
    /// `STORE_USER` / `STORE_PASSWORD` — optional basic auth.
    pub store_user: Option<String>,
    pub store_password: Option<String>,
    /// `STORE_TLS_VERIFY` — default true; `false`/`0` disables.
    pub store_tls_verify: bool,
    /// `STATE_INDEX` / `HISTORY_INDEX`.
    pub state_index: String,
    pub history_index: String,
    /// `MGMT_LISTEN_ADDR` — management API bind address.
    pub listen_addr: String,
    /// `MGMT_ADMIN_TOKEN` — bearer token guarding trigger and reload.
    pub admin_token: Option<String>,
    /// `MGMT_EXTERNAL_URL` — base URL used in `url_to_rule` links;
    /// defaults to `http://<listen_addr>`.
    pub external_url: Option<String>,
    /// `MAX_CONCURRENT_EVALUATIONS` / `MAX_CONCURRENT_DELIVERIES`.
    pub max_concurrent_evaluations: usize,
    pub max_concurrent_deliveries: usize,
    /// `SHUTDOWN_GRACE` — duration wire format, default `5s`.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// As [`from_env`](Self::from_env), with an injectable lookup.
    pub fn from_env_with(
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let rules_dir = env("RULES_DIR").ok_or(ConfigError::Missing("RULES_DIR"))?;
        let store_url = env("STORE_URL").ok_or(ConfigError::Missing("STORE_URL"))?;

        let store_tls_verify = match env("STORE_TLS_VERIFY").as_deref() {
            None | Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(other) => {
                return Err(ConfigError::Invalid(
                    "STORE_TLS_VERIFY",
                    format!("expected true/false, got '{other}'"),
                ));
            }
        };

        let max_concurrent_evaluations =
            parse_usize(&env, "MAX_CONCURRENT_EVALUATIONS", 32)?;
        let max_concurrent_deliveries =
            parse_usize(&env, "MAX_CONCURRENT_DELIVERIES", 64)?;

        let shutdown_grace = match env("SHUTDOWN_GRACE") {
            None => Duration::from_secs(5),
            Some(raw) => parse_duration(&raw)
                .map_err(|e| ConfigError::Invalid("SHUTDOWN_GRACE", e.to_string()))?,
        };

        Ok(Self {
            rules_dir: PathBuf::from(rules_dir),
            store_url,
            store_user: env("STORE_USER"),
            store_password: env("STORE_PASSWORD"),
            store_tls_verify,
            state_index: env("STATE_INDEX")
                .unwrap_or_else(|| "vaultize-alerts-state".to_owned()),
            history_index: env("HISTORY_INDEX")
                .unwrap_or_else(|| "vaultize-alerts-history".to_owned()),
            listen_addr: env("MGMT_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:9600".to_owned()),
            admin_token: env("MGMT_ADMIN_TOKEN"),
            external_url: env("MGMT_EXTERNAL_URL"),
            max_concurrent_evaluations,
            max_concurrent_deliveries,
            shutdown_grace,
        })
    }

    /// The base URL for `url_to_rule` links.
    pub fn external_url(&self) -> String {
        self.external_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.listen_addr))
    }
}

fn parse_usize(
    env: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match env(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(name, format!("expected an integer, got '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env(name: &str) -> Option<String> {
        match name {
            "RULES_DIR" => Some("/etc/vaultize/rules".to_owned()),
            "STORE_URL" => Some("http://store:9200".to_owned()),
            _ => None,
        }
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config = Config::from_env_with(base_env).unwrap();
        assert_eq!(config.rules_dir, PathBuf::from("/etc/vaultize/rules"));
        assert!(config.store_tls_verify);
        assert_eq!(config.state_index, "vaultize-alerts-state");
        assert_eq!(config.history_index, "vaultize-alerts-history");
        assert_eq!(config.listen_addr, "0.0.0.0:9600");
        assert_eq!(config.max_concurrent_evaluations, 32);
        assert_eq!(config.max_concurrent_deliveries, 64);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.external_url(), "http://0.0.0.0:9600");
    }

    #[test]
    fn missing_required_variables_error() {
        let err = Config::from_env_with(|_| None).unwrap_err();
        assert_eq!(err, ConfigError::Missing("RULES_DIR"));

        let err = Config::from_env_with(|n| {
            (n == "RULES_DIR").then(|| "/rules".to_owned())
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("STORE_URL"));
    }

    #[test]
    fn overrides_parse() {
        let config = Config::from_env_with(|name| match name {
            "STORE_TLS_VERIFY" => Some("false".to_owned()),
            "MAX_CONCURRENT_EVALUATIONS" => Some("8".to_owned()),
            "SHUTDOWN_GRACE" => Some("30s".to_owned()),
            "MGMT_ADMIN_TOKEN" => Some("sekrit".to_owned()),
            other => base_env(other),
        })
        .unwrap();

        assert!(!config.store_tls_verify);
        assert_eq!(config.max_concurrent_evaluations, 8);
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
        assert_eq!(config.admin_token.as_deref(), Some("sekrit"));
    }

    #[test]
    fn invalid_values_error() {
        let err = Config::from_env_with(|name| match name {
            "SHUTDOWN_GRACE" => Some("soon".to_owned()),
            other => base_env(other),
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SHUTDOWN_GRACE", _)));

        let err = Config::from_env_with(|name| match name {
            "STORE_TLS_VERIFY" => Some("maybe".to_owned()),
            other => base_env(other),
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("STORE_TLS_VERIFY", _)));
    }
}
