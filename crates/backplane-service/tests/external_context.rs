//! Sends from outside any hub server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use backplane_service::client::ExternalHubContextFactory;
use backplane_service::errors::BackplaneError;
use backplane_test_utils::{reply, TestCluster};

#[tokio::test]
async fn test_external_send_all_reaches_every_server() {
    let cluster = TestCluster::new("chat", 3);
    let a = cluster.connect(0, "conn-a", None).await;
    let b = cluster.connect(1, "conn-b", None).await;
    let c = cluster.connect(2, "conn-c", None).await;

    cluster.external().send_all(reply("hi")).await.unwrap();

    for connection in [&a, &b, &c] {
        assert_eq!(connection.received(), vec![reply("hi")]);
    }
}

#[tokio::test]
async fn test_external_targeted_sends() {
    let cluster = TestCluster::new("chat", 2);
    let a = cluster.connect(0, "conn-a", Some("alice")).await;
    let b = cluster.connect(1, "conn-b", Some("bob")).await;
    cluster.server(1).join_group("conn-b", "g1").await.unwrap();
    let external = cluster.external();

    external.send_group("g1", reply("group")).await.unwrap();
    external.send_user("alice", reply("user")).await.unwrap();
    external.send_connection("conn-b", reply("direct")).await.unwrap();
    external
        .send_all_except(reply("rest"), &["conn-a".to_string()])
        .await
        .unwrap();

    assert_eq!(a.received(), vec![reply("user")]);
    assert_eq!(
        b.received(),
        vec![reply("group"), reply("direct"), reply("rest")]
    );
}

#[tokio::test]
async fn test_factory_caches_context_per_hub() {
    let cluster = TestCluster::new("chat", 1);
    let factory = ExternalHubContextFactory::new(cluster.runtime().clone());

    let first = factory.get("chat").unwrap();
    let second = factory.get("chat").unwrap();
    let other = factory.get("news").unwrap();

    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(other.hub(), "news");
    assert!(matches!(factory.get(""), Err(BackplaneError::InvalidArgument(_))));
}
