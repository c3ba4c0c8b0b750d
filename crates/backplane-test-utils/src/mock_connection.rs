//! Client connection mock.
//!
//! # Example
//!
//! ```rust,ignore
//! use backplane_test_utils::MockConnection;
//!
//! let conn = MockConnection::new("conn-1").with_user("alice").build();
//! frontend.on_connected(conn.clone()).await?;
//!
//! conn.set_failing(true); // every further write fails
//! ```

use async_trait::async_trait;
use backplane_service::errors::BackplaneError;
use backplane_service::transport::{ClientConnection, Invocation};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A client connection that records every successful write.
#[derive(Debug)]
pub struct MockConnection {
    connection_id: String,
    user_id: Option<String>,
    received: Mutex<Vec<Invocation>>,
    failing: AtomicBool,
    failed_writes: AtomicUsize,
}

/// Builder for [`MockConnection`].
pub struct MockConnectionBuilder {
    connection_id: String,
    user_id: Option<String>,
    failing: bool,
}

impl MockConnectionBuilder {
    #[must_use]
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Start out refusing writes.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockConnection> {
        Arc::new(MockConnection {
            connection_id: self.connection_id,
            user_id: self.user_id,
            received: Mutex::new(Vec::new()),
            failing: AtomicBool::new(self.failing),
            failed_writes: AtomicUsize::new(0),
        })
    }
}

impl MockConnection {
    /// Start building a connection with the given id.
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new(connection_id: &str) -> MockConnectionBuilder {
        MockConnectionBuilder {
            connection_id: connection_id.to_string(),
            user_id: None,
            failing: false,
        }
    }

    /// Make every further write succeed or fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Invocations written so far, in order.
    pub fn received(&self) -> Vec<Invocation> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }

    /// Forget recorded writes.
    pub fn reset(&self) {
        self.received.lock().unwrap().clear();
    }
}

#[async_trait]
impl ClientConnection for MockConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    async fn write(&self, invocation: &Invocation) -> Result<(), BackplaneError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(BackplaneError::ConnectionClosed(self.connection_id.clone()));
        }
        self.received.lock().unwrap().push(invocation.clone());
        Ok(())
    }
}
