//! Automatic bridging of process-crossing flows
//!
//! A destination environment with a fabricated process identity makes a
//! declared flow look cross-process, so commit must split it around a
//! network bridge pair, reuse the cached pair on recommit, and evict it
//! once the flow is gone.

use std::sync::Arc;

use object::TypeRegistry;
use proxy::{Environment, LocalEnvironment, TargetRef};
use topology::testing::{env_with_registry, ForeignEnvironment};
use topology::{install_registry, Block, BlockEvent, BlockRegistry, Topology};

use e2e_tests::init_tracing;

fn foreign_env() -> Arc<ForeignEnvironment> {
    let inner = LocalEnvironment::new(Arc::new(TypeRegistry::with_builtins()));
    let registry = Arc::new(BlockRegistry::with_bridges(Arc::clone(inner.registry())));
    install_registry(&inner, registry);
    ForeignEnvironment::new(inner, "bridge-e2e-peer")
}

#[tokio::test]
async fn crossing_flow_gets_a_bridge_pair() {
    init_tracing();
    let env = env_with_registry();
    let a = Arc::new(Block::new("producer", &[], &["0"]));
    let a_proxy = env.proxy_for_target(Arc::clone(&a) as TargetRef);

    let foreign = foreign_env();
    let b = Arc::new(Block::new("consumer", &["0"], &[]));
    let b_proxy = foreign.proxy_for_target(Arc::clone(&b) as TargetRef);

    let topology = Topology::new(Arc::clone(&env));
    topology
        .connect(a_proxy.clone(), "0", b_proxy.clone(), "0")
        .await
        .unwrap();
    topology.commit().await.unwrap();

    // One declared flow, two running halves around the bridge.
    let active = topology.active_flows();
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].src.uid, a.uid());
    assert_eq!(active[1].dst.uid, b.uid());
    assert_eq!(topology.bridge_count(), 1);

    // The producer's acceptor is the bridge sink, not the consumer.
    let subscribers: Vec<String> = a
        .events()
        .into_iter()
        .filter_map(|e| match e {
            BlockEvent::SubscribeInput { peer_uid, .. } => Some(peer_uid),
            _ => None,
        })
        .collect();
    assert_eq!(subscribers.len(), 1);
    assert_ne!(subscribers[0], b.uid());

    let providers: Vec<String> = b
        .events()
        .into_iter()
        .filter_map(|e| match e {
            BlockEvent::SubscribeOutput { peer_uid, .. } => Some(peer_uid),
            _ => None,
        })
        .collect();
    assert_eq!(providers.len(), 1);
    assert_ne!(providers[0], a.uid());

    // Recommit without graph changes rides the cached pair.
    topology.commit().await.unwrap();
    assert_eq!(topology.bridge_count(), 1);
    assert_eq!(topology.active_flows().len(), 2);

    topology.disconnect(a_proxy, "0", b_proxy, "0").await.unwrap();
    topology.commit().await.unwrap();
    assert!(topology.active_flows().is_empty());
    assert_eq!(topology.bridge_count(), 0);
    assert!(!a.is_active() && !b.is_active());
}

#[tokio::test]
async fn fanout_to_one_peer_shares_the_bridge() {
    init_tracing();
    let env = env_with_registry();
    let a = Arc::new(Block::new("producer", &[], &["0"]));
    let a_proxy = env.proxy_for_target(Arc::clone(&a) as TargetRef);

    let foreign = foreign_env();
    let b = Arc::new(Block::new("consumer-b", &["0"], &[]));
    let c = Arc::new(Block::new("consumer-c", &["0"], &[]));
    let b_proxy = foreign.proxy_for_target(Arc::clone(&b) as TargetRef);
    let c_proxy = foreign.proxy_for_target(Arc::clone(&c) as TargetRef);

    let topology = Topology::new(Arc::clone(&env));
    topology.connect(a_proxy.clone(), "0", b_proxy, "0").await.unwrap();
    topology.connect(a_proxy, "0", c_proxy, "0").await.unwrap();
    topology.commit().await.unwrap();

    // Same source port, same destination process: one pair serves both.
    assert_eq!(topology.bridge_count(), 1);
    assert_eq!(topology.active_flows().len(), 3);

    topology.shutdown().await.unwrap();
    assert_eq!(topology.bridge_count(), 0);
}
