//! Server observer mock.
//!
//! Stands in for a whole remote server when testing coordinators directly.
//! A failing observer behaves like a crashed server: every call errors with
//! `Unreachable`.

use async_trait::async_trait;
use backplane_service::errors::BackplaneError;
use backplane_service::observer::{Delivery, ObserverHandle, ServerObserver};
use common::types::{EntityKey, ServerId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Observer endpoint that records what coordinators ask of it.
#[derive(Debug)]
pub struct MockObserver {
    server_id: ServerId,
    failing: AtomicBool,
    deliveries: Mutex<Vec<EntityKey>>,
    pings: AtomicUsize,
    evicted: Mutex<Vec<ServerId>>,
    joins: Mutex<Vec<(String, String)>>,
}

impl MockObserver {
    /// A healthy observer for `server_id`.
    #[must_use]
    pub fn new(server_id: &str) -> Arc<Self> {
        Arc::new(Self {
            server_id: ServerId::new(server_id),
            failing: AtomicBool::new(false),
            deliveries: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            evicted: Mutex::new(Vec::new()),
            joins: Mutex::new(Vec::new()),
        })
    }

    /// An observer whose every call fails.
    #[must_use]
    pub fn failing(server_id: &str) -> Arc<Self> {
        let observer = Self::new(server_id);
        observer.set_failing(true);
        observer
    }

    /// Handle to subscribe with.
    pub fn handle(self: &Arc<Self>) -> ObserverHandle {
        ObserverHandle::new(self.server_id.clone(), Arc::clone(self) as Arc<dyn ServerObserver>)
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Targets of every delivery received, in order.
    pub fn deliveries(&self) -> Vec<EntityKey> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Servers this observer was told were evicted.
    pub fn evicted(&self) -> Vec<ServerId> {
        self.evicted.lock().unwrap().clone()
    }

    /// `(connection_id, group)` joins forwarded to this observer.
    pub fn joins(&self) -> Vec<(String, String)> {
        self.joins.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), BackplaneError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackplaneError::Unreachable(format!(
                "server {} is down",
                self.server_id
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ServerObserver for MockObserver {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), BackplaneError> {
        self.check()?;
        self.deliveries.lock().unwrap().push(delivery.target.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackplaneError> {
        self.check()?;
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn server_evicted(&self, server_id: &ServerId) -> Result<(), BackplaneError> {
        self.check()?;
        self.evicted.lock().unwrap().push(server_id.clone());
        Ok(())
    }

    async fn join_group(&self, connection_id: &str, group: &str) -> Result<bool, BackplaneError> {
        self.check()?;
        self.joins
            .lock()
            .unwrap()
            .push((connection_id.to_string(), group.to_string()));
        Ok(true)
    }

    async fn leave_group(
        &self,
        _connection_id: &str,
        _group: &str,
    ) -> Result<bool, BackplaneError> {
        self.check()?;
        Ok(true)
    }
}
