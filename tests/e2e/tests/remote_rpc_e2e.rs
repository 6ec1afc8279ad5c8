//! RPC over real loopback TCP
//!
//! Exercises the full client/server path end to end:
//! - lookup, call and application faults through a live socket
//! - concurrent callers sharing a connection, and connections served in
//!   parallel
//! - several clients sharing one host environment
//! - clean close and fast failure afterwards

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use object::{Object, TypeRegistry};
use proxy::{Environment, EnvironmentArgs, ProxyError};
use remote::{ClientConfig, RemoteEnvironment};

use e2e_tests::{init_tracing, shared_host, spawn_server};

async fn client(addr: SocketAddr, registry: Arc<TypeRegistry>) -> Arc<RemoteEnvironment> {
    RemoteEnvironment::connect(
        addr,
        "local",
        &EnvironmentArgs::new(),
        registry,
        ClientConfig::default(),
    )
    .await
    .expect("connect to test server")
}

async fn server() -> (SocketAddr, Arc<TypeRegistry>) {
    init_tracing();
    let registry = Arc::new(TypeRegistry::with_builtins());
    let host = shared_host(&registry);
    let addr = spawn_server(host, Arc::clone(&registry))
        .await
        .expect("bind test server");
    (addr, registry)
}

#[tokio::test]
async fn echo_and_fault_over_tcp() {
    let (addr, registry) = server().await;
    let env = client(addr, registry).await;

    let echo = env.find_proxy("echo").await.unwrap();
    assert_eq!(echo.class_name().await.unwrap(), "DelayedEcho");

    let value: i64 = echo
        .call_as("echo", &[Object::wrap(0i64), Object::wrap(42i64)])
        .await
        .unwrap();
    assert_eq!(value, 42);

    let err = echo.call("fail", &[]).await.unwrap_err();
    assert!(err.is_fault());
    assert!(err.to_string().contains("requested failure"));

    env.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    let (addr, registry) = server().await;
    let env = client(addr, registry).await;
    let echo = env.find_proxy("echo").await.unwrap();

    // The host serves one request at a time per connection, so this makes
    // no timing claim; it checks that interleaved callers on a shared
    // connection each get the reply carrying their own value back.
    let mut tasks = Vec::new();
    for i in 0..8i64 {
        let proxy = echo.clone();
        tasks.push(tokio::spawn(async move {
            let value: i64 = proxy
                .call_as("echo", &[Object::wrap(5i64), Object::wrap(i)])
                .await
                .unwrap();
            value
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), i as i64);
    }

    env.close().await.unwrap();
}

#[tokio::test]
async fn connections_are_served_in_parallel() {
    let (addr, registry) = server().await;

    // One slow call per connection. The server spawns a task per accepted
    // connection, so the delays overlap instead of adding up.
    let started = Instant::now();
    let mut tasks = Vec::new();
    for i in 0..8i64 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            let env = client(addr, registry).await;
            let echo = env.find_proxy("echo").await.unwrap();
            let value: i64 = echo
                .call_as("echo", &[Object::wrap(200i64), Object::wrap(i)])
                .await
                .unwrap();
            env.close().await.unwrap();
            value
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), i as i64);
    }
    // Eight serialized calls would take ~1600ms.
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test]
async fn clients_share_the_host_environment() {
    let (addr, registry) = server().await;
    let first = client(addr, Arc::clone(&registry)).await;
    let second = client(addr, registry).await;

    let a: i64 = first
        .find_proxy("echo")
        .await
        .unwrap()
        .call_as("echo", &[Object::wrap(0i64), Object::wrap(1i64)])
        .await
        .unwrap();
    let b: i64 = second
        .find_proxy("echo")
        .await
        .unwrap()
        .call_as("echo", &[Object::wrap(0i64), Object::wrap(2i64)])
        .await
        .unwrap();
    assert_eq!((a, b), (1, 2));

    first.close().await.unwrap();
    // A closed sibling must not disturb the other connection.
    let still: i64 = second
        .find_proxy("echo")
        .await
        .unwrap()
        .call_as("echo", &[Object::wrap(0i64), Object::wrap(3i64)])
        .await
        .unwrap();
    assert_eq!(still, 3);
    second.close().await.unwrap();
}

#[tokio::test]
async fn values_and_comparisons_cross_the_wire() {
    let (addr, registry) = server().await;
    let env = client(addr, registry).await;

    let proxy = env
        .convert_object_to_proxy(Object::wrap(String::from("round trip")))
        .await
        .unwrap();
    let back = env.convert_proxy_to_object(&proxy).await.unwrap();
    assert_eq!(back.extract::<String>().unwrap(), "round trip");

    let small = env.convert_object_to_proxy(Object::wrap(5i64)).await.unwrap();
    let large = env.convert_object_to_proxy(Object::wrap(9i64)).await.unwrap();
    assert_eq!(
        small.compare_to(&large).await.unwrap(),
        std::cmp::Ordering::Less
    );
    assert_ne!(
        small.hash_code().await.unwrap(),
        large.hash_code().await.unwrap()
    );

    env.close().await.unwrap();
}

#[tokio::test]
async fn close_then_call_fails_fast() {
    let (addr, registry) = server().await;
    let env = client(addr, registry).await;

    env.close().await.unwrap();
    while env.is_active() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let started = Instant::now();
    let err = env.find_proxy("echo").await.unwrap_err();
    assert!(matches!(err, ProxyError::ConnectionInactive));
    assert!(started.elapsed() < Duration::from_millis(50));
}
