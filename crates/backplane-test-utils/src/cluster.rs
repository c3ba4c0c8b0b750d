//! In-process cluster harness.
//!
//! Builds N routing frontends for one hub, one per simulated server, all on a
//! single actor runtime. Coordinators reach every server through the
//! runtime's observer directory exactly as they would across processes.
//!
//! # Example
//!
//! ```rust,ignore
//! let cluster = TestCluster::new("chat", 3);
//! for (i, id) in ["conn-a", "conn-b", "conn-c"].into_iter().enumerate() {
//!     cluster.connect(i, id, None).await;
//!     cluster.server(i).join_group(id, "g1").await.unwrap();
//! }
//! cluster.server(0).send_group("g1", reply("hi")).await.unwrap();
//! ```

use crate::mock_connection::MockConnection;
use crate::mock_store::MockStateStore;
use backplane_service::actors::{ActorRuntime, RuntimeSettings};
use backplane_service::client::ExternalHubContext;
use backplane_service::routing::RoutingFrontend;
use common::types::ServerId;
use std::sync::Arc;
use std::time::Duration;

/// Heartbeat interval used unless a test picks its own.
pub const TEST_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Several frontends of one hub sharing a runtime and a store.
pub struct TestCluster {
    hub: String,
    runtime: ActorRuntime,
    store: Arc<MockStateStore>,
    servers: Vec<RoutingFrontend>,
}

impl TestCluster {
    /// Cluster of `servers` frontends with default runtime settings.
    pub fn new(hub: &str, servers: usize) -> Self {
        Self::with_settings(hub, servers, RuntimeSettings::default(), TEST_HEARTBEAT_INTERVAL)
    }

    pub fn with_settings(
        hub: &str,
        servers: usize,
        settings: RuntimeSettings,
        heartbeat_interval: Duration,
    ) -> Self {
        let store = Arc::new(MockStateStore::new());
        let runtime = ActorRuntime::new(store.clone(), settings);
        let servers = (0..servers)
            .map(|index| {
                RoutingFrontend::new(
                    hub,
                    Self::server_id(index),
                    runtime.clone(),
                    heartbeat_interval,
                )
                .expect("frontend should start")
            })
            .collect();

        Self {
            hub: hub.to_string(),
            runtime,
            store,
            servers,
        }
    }

    /// Id of the server at `index` (`srv-0`, `srv-1`, ...).
    pub fn server_id(index: usize) -> ServerId {
        ServerId::new(format!("srv-{index}"))
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Frontend of the server at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn server(&self, index: usize) -> &RoutingFrontend {
        self.servers
            .get(index)
            .unwrap_or_else(|| panic!("no server at index {index}"))
    }

    pub fn servers(&self) -> &[RoutingFrontend] {
        &self.servers
    }

    pub fn runtime(&self) -> &ActorRuntime {
        &self.runtime
    }

    pub fn store(&self) -> &Arc<MockStateStore> {
        &self.store
    }

    /// Send-only context for the hub.
    pub fn external(&self) -> ExternalHubContext {
        ExternalHubContext::new(self.hub.clone(), self.runtime.clone())
            .expect("hub name is valid")
    }

    /// Connect a new mock connection to the server at `index`.
    pub async fn connect(
        &self,
        index: usize,
        connection_id: &str,
        user_id: Option<&str>,
    ) -> Arc<MockConnection> {
        let mut builder = MockConnection::new(connection_id);
        if let Some(user_id) = user_id {
            builder = builder.with_user(user_id);
        }
        let connection = builder.build();
        self.server(index)
            .on_connected(connection.clone())
            .await
            .expect("connect should succeed");
        connection
    }

    /// Shut every frontend down, then the runtime.
    pub async fn shutdown(&self) {
        for server in &self.servers {
            server.shutdown().await;
        }
        self.runtime.shutdown();
    }
}
