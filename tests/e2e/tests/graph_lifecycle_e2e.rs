//! Graph lifecycle driven over a live connection
//!
//! The engine runs in its own environment while the blocks it manages are
//! resolved through a real TCP connection, so every subscribe, activate
//! and teardown message crosses the wire. Covers:
//! - commit ordering observed by the blocks themselves
//! - hierarchical flows resolving through a nested graph to remote leaves
//! - idle detection polling remote activity indicators

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use object::TypeRegistry;
use proxy::{Environment, EnvironmentArgs, TargetRef};
use remote::{ClientConfig, RemoteEnvironment};
use topology::testing::env_with_registry;
use topology::{Block, BlockEvent, Topology};

use e2e_tests::{init_tracing, shared_host, spawn_server};

struct Remote {
    env: Arc<RemoteEnvironment>,
    producer: Arc<Block>,
    consumer: Arc<Block>,
}

async fn remote_blocks() -> Remote {
    init_tracing();
    let registry = Arc::new(TypeRegistry::with_builtins());
    let host = shared_host(&registry);
    let producer = Arc::new(Block::new("producer", &[], &["0"]));
    let consumer = Arc::new(Block::new("consumer", &["0"], &[]));
    host.register("blocks/producer", Arc::clone(&producer) as TargetRef);
    host.register("blocks/consumer", Arc::clone(&consumer) as TargetRef);

    let addr: SocketAddr = spawn_server(host, Arc::clone(&registry))
        .await
        .expect("bind test server");
    let env = RemoteEnvironment::connect(
        addr,
        "local",
        &EnvironmentArgs::new(),
        registry,
        ClientConfig::default(),
    )
    .await
    .expect("connect to test server");
    Remote {
        env,
        producer,
        consumer,
    }
}

#[tokio::test]
async fn commit_orders_lifecycle_messages_over_the_wire() {
    let remote = remote_blocks().await;
    let a_proxy = remote.env.find_proxy("blocks/producer").await.unwrap();
    let b_proxy = remote.env.find_proxy("blocks/consumer").await.unwrap();

    let topology = Topology::new(env_with_registry());
    topology
        .connect(a_proxy.clone(), "0", b_proxy.clone(), "0")
        .await
        .unwrap();
    topology.commit().await.unwrap();

    assert_eq!(topology.active_flows().len(), 1);
    assert!(remote.producer.is_active());
    assert!(remote.consumer.is_active());

    topology.disconnect(a_proxy, "0", b_proxy, "0").await.unwrap();
    topology.commit().await.unwrap();
    assert!(topology.active_flows().is_empty());
    assert!(!remote.producer.is_active());
    assert!(!remote.consumer.is_active());

    let b_uid = remote.consumer.uid().to_string();
    assert_eq!(
        remote.producer.events(),
        vec![
            BlockEvent::SubscribeInput {
                port: "0".into(),
                peer_uid: b_uid.clone(),
                peer_port: "0".into(),
            },
            BlockEvent::Activate,
            BlockEvent::UnsubscribeInput {
                port: "0".into(),
                peer_uid: b_uid,
                peer_port: "0".into(),
            },
            BlockEvent::Deactivate,
        ]
    );
    let deactivations = remote
        .consumer
        .events()
        .into_iter()
        .filter(|e| *e == BlockEvent::Deactivate)
        .count();
    assert_eq!(deactivations, 1);

    remote.env.close().await.unwrap();
}

#[tokio::test]
async fn nested_graphs_resolve_to_remote_leaves() {
    let remote = remote_blocks().await;
    let a_proxy = remote.env.find_proxy("blocks/producer").await.unwrap();
    let b_proxy = remote.env.find_proxy("blocks/consumer").await.unwrap();

    let engine_env = env_with_registry();
    let inner = Topology::new(Arc::clone(&engine_env));
    inner.connect(&inner, "in", b_proxy, "0").await.unwrap();

    let outer = Topology::new(engine_env);
    outer.connect(a_proxy, "0", &inner, "in").await.unwrap();
    outer.commit().await.unwrap();

    // The boundary dissolves: one flow from the remote producer straight
    // to the remote consumer.
    let active = outer.active_flows();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].src.uid, remote.producer.uid());
    assert_eq!(active[0].dst.uid, remote.consumer.uid());
    assert!(remote.producer.is_active() && remote.consumer.is_active());

    outer.shutdown().await.unwrap();
    assert!(!remote.producer.is_active());
    remote.env.close().await.unwrap();
}

#[tokio::test]
async fn wait_inactive_polls_remote_indicators() {
    let remote = remote_blocks().await;
    let a_proxy = remote.env.find_proxy("blocks/producer").await.unwrap();
    let b_proxy = remote.env.find_proxy("blocks/consumer").await.unwrap();

    let topology = Topology::new(env_with_registry());
    topology.connect(a_proxy, "0", b_proxy, "0").await.unwrap();
    topology.commit().await.unwrap();

    // Blocks have been idle since creation well past the threshold, so the
    // first polling round already reports quiescence.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let started = Instant::now();
    let idle = topology
        .wait_inactive(Duration::from_millis(300), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(idle);
    assert!(started.elapsed() < Duration::from_millis(150));

    topology.shutdown().await.unwrap();
    remote.env.close().await.unwrap();
}
