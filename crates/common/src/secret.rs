//! Secret types for values that must never reach logs.
//!
//! The backplane handles few secrets, but the ones it has are connection
//! strings with embedded credentials (`redis://:password@host:6379`). Those
//! are carried as [`SecretString`], whose `Debug` output is redacted, so a
//! config struct deriving or hand-writing `Debug` cannot leak them.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let url = SecretString::from("redis://:hunter2@cache:6379");
//! assert!(!format!("{url:?}").contains("hunter2"));
//! assert_eq!(url.expose_secret(), "redis://:hunter2@cache:6379");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Strip the userinfo part of a URL so it can be logged.
///
/// `redis://:pw@host:6379/0` becomes `redis://host:6379/0`. Inputs without a
/// scheme or without credentials are returned unchanged.
#[must_use]
pub fn redact_url(url: &SecretString) -> String {
    let raw = url.expose_secret();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return raw.to_string();
    };

    match rest.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://{host}"),
        None => raw.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("redis://:hunter2@cache:6379");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_redact_url_strips_credentials() {
        let url = SecretString::from("redis://user:pw@cache.internal:6379/2");
        assert_eq!(redact_url(&url), "redis://cache.internal:6379/2");
    }

    #[test]
    fn test_redact_url_without_credentials_is_unchanged() {
        let url = SecretString::from("redis://localhost:6379");
        assert_eq!(redact_url(&url), "redis://localhost:6379");
    }

    #[test]
    fn test_redact_url_without_scheme_is_unchanged() {
        let url = SecretString::from("localhost:6379");
        assert_eq!(redact_url(&url), "localhost:6379");
    }
}
