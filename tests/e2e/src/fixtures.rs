//! Shared fixtures for the end-to-end suite.

use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use object::{Object, TypeRegistry};
use proxy::{
    CallFault, CallTarget, Environment, EnvironmentFactory, LocalEnvironment, TargetRef,
};
use remote::{RemoteServer, ServerConfig};
use topology::{install_registry, BlockRegistry};

static INIT: Once = Once::new();

/// Route test logs through tracing, once per process.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Echoes its second argument after sleeping for the first (milliseconds).
/// The delay makes reply interleaving observable over one connection.
pub struct DelayedEcho;

#[async_trait]
impl CallTarget for DelayedEcho {
    async fn call(&self, name: &str, args: &[Object]) -> Result<Object, CallFault> {
        match name {
            "echo" => {
                let delay = *args[0]
                    .extract::<i64>()
                    .map_err(|e| CallFault::new(e.to_string()))?;
                let value = *args[1]
                    .extract::<i64>()
                    .map_err(|e| CallFault::new(e.to_string()))?;
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                Ok(Object::wrap(value))
            }
            "fail" => Err(CallFault::new("requested failure")),
            other => Err(CallFault::new(format!("no method: {}", other))),
        }
    }

    fn class_name(&self) -> &str {
        "DelayedEcho"
    }
}

/// Host environment with the echo target and the block registry installed.
/// Tests hold this directly to observe what clients do over the wire.
pub fn shared_host(registry: &Arc<TypeRegistry>) -> Arc<LocalEnvironment> {
    let env = LocalEnvironment::new(Arc::clone(registry));
    env.register("echo", Arc::new(DelayedEcho) as TargetRef);
    let blocks = Arc::new(BlockRegistry::with_bridges(Arc::clone(env.registry())));
    install_registry(&env, blocks);
    env
}

/// Bind a server on an OS-assigned loopback port and run its accept loop
/// in the background. Every `env_open` resolves to the same shared host.
pub async fn spawn_server(
    host: Arc<LocalEnvironment>,
    registry: Arc<TypeRegistry>,
) -> anyhow::Result<SocketAddr> {
    let factory = Arc::new(EnvironmentFactory::new());
    factory.register("local", move |_args| {
        Ok(Arc::clone(&host) as Arc<dyn Environment>)
    });
    let server = RemoteServer::bind(factory, registry, ServerConfig::default()).await?;
    let addr = server.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            warn!(error = %e, "server accept loop ended");
        }
    });
    Ok(addr)
}
