//! State store mock.
//!
//! Wraps the in-memory store, counts operations and can be told to fail
//! saves (to exercise subscribe rollback).

use async_trait::async_trait;
use backplane_service::errors::BackplaneError;
use backplane_service::state::{MemoryStateStore, StateStore, SubscriptionState};
use common::types::{EntityKey, ServerId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counting [`StateStore`] over a [`MemoryStateStore`].
#[derive(Debug, Default)]
pub struct MockStateStore {
    inner: MemoryStateStore,
    loads: AtomicUsize,
    saves: AtomicUsize,
    clears: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MockStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every further `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Persisted subscribers of `key` (empty when nothing is stored).
    pub async fn persisted(&self, key: &EntityKey) -> Vec<ServerId> {
        self.inner
            .load(key)
            .await
            .unwrap()
            .map(|state| state.subscribers.into_iter().collect())
            .unwrap_or_default()
    }

    /// Whether anything is persisted for `key`.
    pub async fn contains(&self, key: &EntityKey) -> bool {
        self.inner.load(key).await.unwrap().is_some()
    }

    /// Write state directly, bypassing coordinators.
    pub async fn seed(&self, key: &EntityKey, servers: &[ServerId]) {
        self.inner
            .save(key, &SubscriptionState::from_servers(servers))
            .await
            .unwrap();
    }
}

#[async_trait]
impl StateStore for MockStateStore {
    async fn load(&self, key: &EntityKey) -> Result<Option<SubscriptionState>, BackplaneError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(key).await
    }

    async fn save(&self, key: &EntityKey, state: &SubscriptionState) -> Result<(), BackplaneError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(BackplaneError::StateStore("injected save failure".to_string()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(key, state).await
    }

    async fn clear(&self, key: &EntityKey) -> Result<(), BackplaneError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear(key).await
    }
}
