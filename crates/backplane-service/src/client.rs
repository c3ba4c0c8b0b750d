//! Sending into a hub from a process that holds no client connections.
//!
//! An [`ExternalHubContext`] has no local registry and no observer endpoint;
//! every send goes straight to the target coordinator's fan-out with no
//! origin, so every subscribed server delivers.

use crate::actors::runtime::ActorRuntime;
use crate::errors::BackplaneError;
use crate::observability::metrics as prom;
use crate::observer::Delivery;
use crate::routing::{require_id, require_ids, require_method};
use crate::transport::Invocation;

use common::types::EntityKey;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

/// Send-only view of one hub.
#[derive(Clone)]
pub struct ExternalHubContext {
    hub: String,
    runtime: ActorRuntime,
}

impl ExternalHubContext {
    /// # Errors
    ///
    /// `InvalidArgument` if `hub` is empty.
    pub fn new(hub: impl Into<String>, runtime: ActorRuntime) -> Result<Self, BackplaneError> {
        let hub = hub.into();
        require_id("hub name", &hub)?;
        Ok(Self { hub, runtime })
    }

    #[must_use]
    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// # Errors
    ///
    /// `InvalidArgument` for an empty method name.
    pub async fn send_all(&self, invocation: Invocation) -> Result<(), BackplaneError> {
        require_method(&invocation)?;
        self.send(
            "external_send_all",
            Delivery::new(EntityKey::all(&self.hub), Arc::new(invocation)),
        )
        .await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` for an empty method name.
    pub async fn send_all_except(
        &self,
        invocation: Invocation,
        excluded: &[String],
    ) -> Result<(), BackplaneError> {
        require_method(&invocation)?;
        self.send(
            "external_send_all_except",
            Delivery::with_excluded(
                EntityKey::all(&self.hub),
                Arc::new(invocation),
                excluded.to_vec(),
            ),
        )
        .await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` for an empty connection id or method name.
    pub async fn send_connection(
        &self,
        connection_id: &str,
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_id("connection id", connection_id)?;
        require_method(&invocation)?;
        self.send(
            "external_send_connection",
            Delivery::new(
                EntityKey::connection(&self.hub, connection_id),
                Arc::new(invocation),
            ),
        )
        .await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` if any id or the method name is empty.
    pub async fn send_connections(
        &self,
        connection_ids: &[String],
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_ids("connection id", connection_ids)?;
        require_method(&invocation)?;
        let keys = connection_ids
            .iter()
            .map(|id| EntityKey::connection(&self.hub, id))
            .collect();
        self.send_many("external_send_connections", keys, invocation)
            .await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` for an empty group name or method name.
    pub async fn send_group(
        &self,
        group: &str,
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_id("group name", group)?;
        require_method(&invocation)?;
        self.send(
            "external_send_group",
            Delivery::new(EntityKey::group(&self.hub, group), Arc::new(invocation)),
        )
        .await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` if any group name or the method name is empty.
    pub async fn send_groups(
        &self,
        groups: &[String],
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_ids("group name", groups)?;
        require_method(&invocation)?;
        let keys = groups
            .iter()
            .map(|group| EntityKey::group(&self.hub, group))
            .collect();
        self.send_many("external_send_groups", keys, invocation).await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` for an empty group name or method name.
    pub async fn send_group_except(
        &self,
        group: &str,
        invocation: Invocation,
        excluded: &[String],
    ) -> Result<(), BackplaneError> {
        require_id("group name", group)?;
        require_method(&invocation)?;
        self.send(
            "external_send_group_except",
            Delivery::with_excluded(
                EntityKey::group(&self.hub, group),
                Arc::new(invocation),
                excluded.to_vec(),
            ),
        )
        .await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` for an empty user id or method name.
    pub async fn send_user(
        &self,
        user_id: &str,
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_id("user id", user_id)?;
        require_method(&invocation)?;
        self.send(
            "external_send_user",
            Delivery::new(EntityKey::user(&self.hub, user_id), Arc::new(invocation)),
        )
        .await;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` if any user id or the method name is empty.
    pub async fn send_users(
        &self,
        user_ids: &[String],
        invocation: Invocation,
    ) -> Result<(), BackplaneError> {
        require_ids("user id", user_ids)?;
        require_method(&invocation)?;
        let keys = user_ids
            .iter()
            .map(|user| EntityKey::user(&self.hub, user))
            .collect();
        self.send_many("external_send_users", keys, invocation).await;
        Ok(())
    }

    async fn send_many(
        &self,
        operation: &'static str,
        keys: Vec<EntityKey>,
        invocation: Invocation,
    ) {
        let invocation = Arc::new(invocation);
        join_all(
            keys.into_iter()
                .map(|key| self.send(operation, Delivery::new(key, Arc::clone(&invocation)))),
        )
        .await;
    }

    async fn send(&self, operation: &'static str, delivery: Delivery) {
        let started = Instant::now();
        let entity = delivery.target.clone();
        let result = self
            .runtime
            .coordinator(delivery.target.clone())
            .notify(delivery, None)
            .await;

        let status = match result {
            Ok(outcome) => {
                debug!(
                    target: "backplane.routing",
                    operation,
                    entity = %entity,
                    delivered = outcome.delivered,
                    evicted = outcome.evicted.len(),
                    "External send completed"
                );
                if outcome.evicted.is_empty() {
                    "success"
                } else {
                    "error"
                }
            }
            Err(e) => {
                warn!(
                    target: "backplane.routing",
                    operation,
                    entity = %entity,
                    error = %e,
                    "External send failed"
                );
                "error"
            }
        };
        prom::record_send(operation, status, started.elapsed());
    }
}

/// One [`ExternalHubContext`] per hub name, created on first use.
pub struct ExternalHubContextFactory {
    runtime: ActorRuntime,
    contexts: Mutex<HashMap<String, Arc<ExternalHubContext>>>,
}

impl ExternalHubContextFactory {
    #[must_use]
    pub fn new(runtime: ActorRuntime) -> Self {
        Self {
            runtime,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Context for `hub`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `hub` is empty.
    pub fn get(&self, hub: &str) -> Result<Arc<ExternalHubContext>, BackplaneError> {
        require_id("hub name", hub)?;

        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(context) = contexts.get(hub) {
            return Ok(Arc::clone(context));
        }

        let context = Arc::new(ExternalHubContext::new(hub, self.runtime.clone())?);
        contexts.insert(hub.to_string(), Arc::clone(&context));
        Ok(context)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::runtime::RuntimeSettings;
    use crate::state::MemoryStateStore;
    use serde_json::json;

    fn factory() -> ExternalHubContextFactory {
        ExternalHubContextFactory::new(ActorRuntime::new(
            Arc::new(MemoryStateStore::new()),
            RuntimeSettings::default(),
        ))
    }

    #[test]
    fn test_factory_caches_per_hub() {
        let factory = factory();
        let first = factory.get("chat").unwrap();
        let second = factory.get("chat").unwrap();
        let other = factory.get("news").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.hub(), "news");
        assert!(matches!(
            factory.get(""),
            Err(BackplaneError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_send_without_subscribers_succeeds() {
        let context = factory().get("chat").unwrap();
        let invocation = Invocation::new("Reply", vec![json!("hi")]);

        assert!(context.send_all(invocation.clone()).await.is_ok());
        assert!(context.send_group("g1", invocation.clone()).await.is_ok());
        assert!(context
            .send_users(&["u1".to_string(), "u2".to_string()], invocation)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_invalid_targets_rejected() {
        let context = factory().get("chat").unwrap();
        let invocation = Invocation::new("Reply", vec![]);

        assert!(matches!(
            context.send_group("", invocation.clone()).await,
            Err(BackplaneError::InvalidArgument(_))
        ));
        assert!(matches!(
            context.send_user("", invocation.clone()).await,
            Err(BackplaneError::InvalidArgument(_))
        ));
        assert!(matches!(
            context
                .send_connections(&[String::new()], invocation)
                .await,
            Err(BackplaneError::InvalidArgument(_))
        ));
    }
}
