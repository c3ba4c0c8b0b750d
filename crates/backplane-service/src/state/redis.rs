//! Redis-backed state store.
//!
//! # Key Patterns
//!
//! - `backplane:{hub}:{kind}:{id}:subscribers` - subscriber set (JSON)
//!
//! Values are written whole; the owning coordinator is the only writer for
//! its key, so no fencing is applied.
//!
//! The redis-rs `MultiplexedConnection` is cloned per operation.

use super::{storage_key, StateStore, SubscriptionState};
use crate::errors::BackplaneError;

use async_trait::async_trait;
use common::secret::{redact_url, ExposeSecret, SecretString};
use common::types::EntityKey;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, error, instrument, warn};

/// [`StateStore`] shared by every backplane node through Redis.
#[derive(Clone)]
pub struct RedisStateStore {
    connection: MultiplexedConnection,
}

impl RedisStateStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `BackplaneError::Redis` if the client cannot be opened or the
    /// connection cannot be established.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, BackplaneError> {
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            error!(
                target: "backplane.state",
                error = %e,
                url = %redact_url(redis_url),
                "Failed to open Redis client"
            );
            BackplaneError::Redis(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "backplane.state",
                    error = %e,
                    url = %redact_url(redis_url),
                    "Failed to connect to Redis"
                );
                BackplaneError::Redis(format!("Failed to connect to Redis: {e}"))
            })?;

        debug!(
            target: "backplane.state",
            url = %redact_url(redis_url),
            "Connected to Redis state store"
        );

        Ok(Self { connection })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    #[instrument(skip_all, fields(entity = %key))]
    async fn load(&self, key: &EntityKey) -> Result<Option<SubscriptionState>, BackplaneError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(storage_key(key)).await.map_err(|e| {
            warn!(target: "backplane.state", error = %e, entity = %key, "Failed to load state");
            BackplaneError::Redis(format!("Failed to load state: {e}"))
        })?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                warn!(target: "backplane.state", error = %e, entity = %key, "Corrupt state");
                BackplaneError::StateStore(format!("Corrupt state for {key}: {e}"))
            })
        })
        .transpose()
    }

    #[instrument(skip_all, fields(entity = %key, subscribers = state.subscribers.len()))]
    async fn save(&self, key: &EntityKey, state: &SubscriptionState) -> Result<(), BackplaneError> {
        let json = serde_json::to_string(state)
            .map_err(|e| BackplaneError::StateStore(format!("Failed to encode state: {e}")))?;

        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(storage_key(key), json)
            .await
            .map_err(|e| {
                warn!(target: "backplane.state", error = %e, entity = %key, "Failed to save state");
                BackplaneError::Redis(format!("Failed to save state: {e}"))
            })
    }

    #[instrument(skip_all, fields(entity = %key))]
    async fn clear(&self, key: &EntityKey) -> Result<(), BackplaneError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(storage_key(key)).await.map_err(|e| {
            warn!(target: "backplane.state", error = %e, entity = %key, "Failed to clear state");
            BackplaneError::Redis(format!("Failed to clear state: {e}"))
        })
    }
}
