//! Client-connection contract.
//!
//! The backplane never touches wire framing or handshakes. A connection is a
//! writable sink identified by a connection id and an optional user id; the
//! hosting transport (WebSocket, long-poll, ...) implements [`ClientConnection`].

use crate::errors::BackplaneError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A hub method invocation: method name plus positional arguments.
///
/// Shared behind an `Arc` during fan-out so one payload serves every target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Client-side method name.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl Invocation {
    /// Create a new invocation.
    #[must_use]
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// A live client connection accepted by this server.
#[async_trait]
pub trait ClientConnection: Send + Sync {
    /// Connection id, unique per server process lifetime.
    fn connection_id(&self) -> &str;

    /// Authenticated user id, if any.
    fn user_id(&self) -> Option<&str>;

    /// Write one invocation to the client.
    ///
    /// May suspend under backpressure. An error isolates this connection only.
    async fn write(&self, invocation: &Invocation) -> Result<(), BackplaneError>;
}

/// Shared connection object as stored by the registry.
pub type SharedConnection = Arc<dyn ClientConnection>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_serializes_method_and_args() {
        let invocation = Invocation::new("Reply", vec![json!("hi"), json!(3)]);
        let encoded = serde_json::to_value(&invocation).unwrap();
        assert_eq!(encoded, json!({"method": "Reply", "args": ["hi", 3]}));
    }
}
