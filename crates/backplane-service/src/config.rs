//! Backplane service configuration.
//!
//! Configuration is loaded from environment variables. The Redis URL is
//! redacted in Debug output.

use crate::actors::RuntimeSettings;

use common::config::ObservabilityConfig;
use common::secret::{redact_url, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default hub list.
pub const DEFAULT_HUBS: &str = "default";

/// Default idle cleanup period of entity coordinators (24h).
pub const DEFAULT_ENTITY_CLEANUP_PERIOD_SECONDS: u64 = 86_400;

/// Default presence heartbeat interval.
pub const DEFAULT_PRESENCE_HEARTBEAT_INTERVAL_SECONDS: u64 = 10;

/// Default presence expiry window.
pub const DEFAULT_PRESENCE_EXPIRY_SECONDS: u64 = 30;

/// Default bound for one remote call.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

/// Default server id prefix.
pub const DEFAULT_SERVER_ID_PREFIX: &str = "bp";

/// Where coordinator state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateStoreKind {
    /// Process memory. State does not outlive the process.
    Memory,
    /// Redis at `REDIS_URL`.
    Redis,
}

/// Backplane service configuration.
#[derive(Clone)]
pub struct Config {
    /// Unique id of this server process.
    pub server_id: String,

    /// Hubs served by this process.
    pub hubs: Vec<String>,

    /// Liveness reminder period of entity coordinators.
    pub entity_cleanup_period_seconds: u64,

    /// Presence heartbeat interval.
    pub presence_heartbeat_interval_seconds: u64,

    /// Servers silent for longer than this are evicted.
    pub presence_expiry_seconds: u64,

    /// Bound for one coordinator or observer call.
    pub call_timeout_ms: u64,

    pub state_store: StateStoreKind,

    /// Redis connection URL, required for the Redis store.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: Option<SecretString>,

    /// Health endpoint bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    pub observability: ObservabilityConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_id", &self.server_id)
            .field("hubs", &self.hubs)
            .field(
                "entity_cleanup_period_seconds",
                &self.entity_cleanup_period_seconds,
            )
            .field(
                "presence_heartbeat_interval_seconds",
                &self.presence_heartbeat_interval_seconds,
            )
            .field("presence_expiry_seconds", &self.presence_expiry_seconds)
            .field("call_timeout_ms", &self.call_timeout_ms)
            .field("state_store", &self.state_store)
            .field("redis_url", &self.redis_url.as_ref().map(redact_url))
            .field("health_bind_address", &self.health_bind_address)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// `MissingEnvVar` if the Redis store is selected without `REDIS_URL`;
    /// `InvalidValue` for unparsable numbers, an unknown store, an empty hub
    /// list, zero durations, or a presence expiry not above the heartbeat
    /// interval.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server_id = vars
            .get("BACKPLANE_SERVER_ID")
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or_else(generate_server_id);

        let hubs: Vec<String> = vars
            .get("BACKPLANE_HUBS")
            .map_or(DEFAULT_HUBS, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|hub| !hub.is_empty())
            .map(str::to_string)
            .collect();
        if hubs.is_empty() {
            return Err(ConfigError::InvalidValue(
                "BACKPLANE_HUBS must name at least one hub".to_string(),
            ));
        }

        let entity_cleanup_period_seconds = parse_positive(
            vars,
            "BACKPLANE_ENTITY_CLEANUP_PERIOD_SECONDS",
            DEFAULT_ENTITY_CLEANUP_PERIOD_SECONDS,
        )?;
        let presence_heartbeat_interval_seconds = parse_positive(
            vars,
            "BACKPLANE_PRESENCE_HEARTBEAT_INTERVAL_SECONDS",
            DEFAULT_PRESENCE_HEARTBEAT_INTERVAL_SECONDS,
        )?;
        let presence_expiry_seconds = parse_positive(
            vars,
            "BACKPLANE_PRESENCE_EXPIRY_SECONDS",
            DEFAULT_PRESENCE_EXPIRY_SECONDS,
        )?;
        let call_timeout_ms =
            parse_positive(vars, "BACKPLANE_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT_MS)?;

        if presence_expiry_seconds <= presence_heartbeat_interval_seconds {
            return Err(ConfigError::InvalidValue(format!(
                "BACKPLANE_PRESENCE_EXPIRY_SECONDS ({presence_expiry_seconds}) must exceed \
                 BACKPLANE_PRESENCE_HEARTBEAT_INTERVAL_SECONDS \
                 ({presence_heartbeat_interval_seconds})"
            )));
        }

        let state_store = match vars.get("BACKPLANE_STATE_STORE").map(String::as_str) {
            None | Some("memory") => StateStoreKind::Memory,
            Some("redis") => StateStoreKind::Redis,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "BACKPLANE_STATE_STORE must be 'memory' or 'redis', got '{other}'"
                )))
            }
        };

        let redis_url = vars.get("REDIS_URL").cloned().map(SecretString::from);
        if state_store == StateStoreKind::Redis && redis_url.is_none() {
            return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
        }

        let health_bind_address = vars
            .get("BACKPLANE_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        Ok(Config {
            server_id,
            hubs,
            entity_cleanup_period_seconds,
            presence_heartbeat_interval_seconds,
            presence_expiry_seconds,
            call_timeout_ms,
            state_store,
            redis_url,
            health_bind_address,
            observability: ObservabilityConfig::from_vars(vars),
        })
    }

    /// Actor runtime timings derived from this configuration.
    #[must_use]
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            liveness_period: Duration::from_secs(self.entity_cleanup_period_seconds),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            presence_expiry: Duration::from_secs(self.presence_expiry_seconds),
        }
    }

    #[must_use]
    pub fn presence_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.presence_heartbeat_interval_seconds)
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!("{name} must be positive"))),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(format!("{name}: {e}"))),
    }
}

fn generate_server_id() -> String {
    let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_SERVER_ID_PREFIX}-{hostname}-{short_suffix}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert!(config.server_id.starts_with("bp-"));
        assert_eq!(config.hubs, vec!["default".to_string()]);
        assert_eq!(config.entity_cleanup_period_seconds, 86_400);
        assert_eq!(config.presence_heartbeat_interval_seconds, 10);
        assert_eq!(config.presence_expiry_seconds, 30);
        assert_eq!(config.call_timeout_ms, 5_000);
        assert_eq!(config.state_store, StateStoreKind::Memory);
        assert!(config.redis_url.is_none());
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);

        let settings = config.runtime_settings();
        assert_eq!(settings.liveness_period, Duration::from_secs(86_400));
        assert_eq!(settings.call_timeout, Duration::from_secs(5));
        assert_eq!(settings.presence_expiry, Duration::from_secs(30));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("BACKPLANE_SERVER_ID", "bp-test-001"),
            ("BACKPLANE_HUBS", "chat, news ,,"),
            ("BACKPLANE_ENTITY_CLEANUP_PERIOD_SECONDS", "600"),
            ("BACKPLANE_PRESENCE_HEARTBEAT_INTERVAL_SECONDS", "5"),
            ("BACKPLANE_PRESENCE_EXPIRY_SECONDS", "20"),
            ("BACKPLANE_CALL_TIMEOUT_MS", "250"),
            ("BACKPLANE_HEALTH_BIND_ADDRESS", "127.0.0.1:9000"),
        ]))
        .expect("Config should load successfully");

        assert_eq!(config.server_id, "bp-test-001");
        assert_eq!(config.hubs, vec!["chat".to_string(), "news".to_string()]);
        assert_eq!(config.presence_heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(
            config.runtime_settings().call_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(config.health_bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_expiry_must_exceed_heartbeat_interval() {
        let result = Config::from_vars(&vars(&[
            ("BACKPLANE_PRESENCE_HEARTBEAT_INTERVAL_SECONDS", "30"),
            ("BACKPLANE_PRESENCE_EXPIRY_SECONDS", "30"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        for (name, value) in [
            ("BACKPLANE_CALL_TIMEOUT_MS", "soon"),
            ("BACKPLANE_CALL_TIMEOUT_MS", "0"),
            ("BACKPLANE_ENTITY_CLEANUP_PERIOD_SECONDS", "-1"),
        ] {
            let result = Config::from_vars(&vars(&[(name, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(ref msg)) if msg.contains(name)),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_hub_list_rejected() {
        let result = Config::from_vars(&vars(&[("BACKPLANE_HUBS", " , ")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_redis_store_requires_url() {
        let result = Config::from_vars(&vars(&[("BACKPLANE_STATE_STORE", "redis")]));
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "REDIS_URL"));

        let config = Config::from_vars(&vars(&[
            ("BACKPLANE_STATE_STORE", "redis"),
            ("REDIS_URL", "redis://:hunter2@localhost:6379"),
        ]))
        .unwrap();
        assert_eq!(config.state_store, StateStoreKind::Redis);
        assert_eq!(
            config.redis_url.as_ref().unwrap().expose_secret(),
            "redis://:hunter2@localhost:6379"
        );

        let result = Config::from_vars(&vars(&[("BACKPLANE_STATE_STORE", "etcd")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_redis_password() {
        let config = Config::from_vars(&vars(&[
            ("BACKPLANE_STATE_STORE", "redis"),
            ("REDIS_URL", "redis://:hunter2@localhost:6379"),
        ]))
        .unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("hunter2"));
        assert!(debug_output.contains("localhost"));
    }
}
