//! Common configuration types for backplane components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default tracing filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "backplane_service=debug,tower_http=debug";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Load from a variable map (`BACKPLANE_LOG_FILTER`, `BACKPLANE_LOG_JSON`).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_filter = vars
            .get("BACKPLANE_LOG_FILTER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let json_logs = vars
            .get("BACKPLANE_LOG_JSON")
            .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"));

        Self {
            log_filter,
            json_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn test_json_logs_flag() {
        let vars = HashMap::from([("BACKPLANE_LOG_JSON".to_string(), "true".to_string())]);
        assert!(ObservabilityConfig::from_vars(&vars).json_logs);

        let vars = HashMap::from([("BACKPLANE_LOG_JSON".to_string(), "nope".to_string())]);
        assert!(!ObservabilityConfig::from_vars(&vars).json_logs);
    }
}
