//! In-memory state store.

use super::{StateStore, SubscriptionState};
use crate::errors::BackplaneError;

use async_trait::async_trait;
use common::types::EntityKey;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local [`StateStore`].
///
/// State survives coordinator deactivation (the store outlives activations)
/// but not a process restart.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<EntityKey, SubscriptionState>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with persisted state.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    /// Whether no key has persisted state.
    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &EntityKey) -> Result<Option<SubscriptionState>, BackplaneError> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn save(&self, key: &EntityKey, state: &SubscriptionState) -> Result<(), BackplaneError> {
        self.states.write().await.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn clear(&self, key: &EntityKey) -> Result<(), BackplaneError> {
        self.states.write().await.remove(key);
        Ok(())
    }
}
