//! Test Support
//!
//! Doubles for exercising cross-process behavior inside one process
//! without spawning a second process or a real connection.

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use object::{Object, TypeRegistry};
use proxy::{Environment, LocalEnvironment, Proxy, TargetRef};

use crate::registry::{install_registry, BlockRegistry};

/// A local environment with the bridge-capable block registry installed
/// under the well-known name.
pub fn env_with_registry() -> Arc<LocalEnvironment> {
    let env = LocalEnvironment::new(Arc::new(TypeRegistry::with_builtins()));
    let registry = Arc::new(BlockRegistry::with_bridges(Arc::clone(env.registry())));
    install_registry(&env, registry);
    env
}

/// Wraps a local environment under a fabricated process identity, so flows
/// into it look cross-process to the engine. Handed-out proxies are
/// re-bound to the wrapper; their handles stay local, so calls execute
/// in-process.
pub struct ForeignEnvironment {
    inner: Arc<LocalEnvironment>,
    unique_pid: String,
    node_id: String,
    me: Weak<ForeignEnvironment>,
}

impl ForeignEnvironment {
    pub fn new(inner: Arc<LocalEnvironment>, unique_pid: impl Into<String>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            inner,
            unique_pid: unique_pid.into(),
            node_id: "foreign-node".to_string(),
            me: me.clone(),
        })
    }

    fn rebind(&self, proxy: Proxy) -> Proxy {
        let env = self.me.upgrade().expect("environment alive") as Arc<dyn Environment>;
        Proxy::new(env, Arc::clone(proxy.handle()))
    }

    /// Wrap a callable object as a proxy that reports this environment's
    /// process identity.
    pub fn proxy_for_target(&self, target: TargetRef) -> Proxy {
        self.rebind(self.inner.proxy_for_target(target))
    }
}

#[async_trait]
impl Environment for ForeignEnvironment {
    fn variant(&self) -> &str {
        "foreign"
    }

    fn unique_pid(&self) -> &str {
        &self.unique_pid
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn registry(&self) -> &Arc<TypeRegistry> {
        self.inner.registry()
    }

    async fn find_proxy(&self, name: &str) -> proxy::Result<Proxy> {
        Ok(self.rebind(self.inner.find_proxy(name).await?))
    }

    async fn convert_object_to_proxy(&self, obj: Object) -> proxy::Result<Proxy> {
        Ok(self.rebind(self.inner.convert_object_to_proxy(obj).await?))
    }

    async fn convert_proxy_to_object(&self, proxy: &Proxy) -> proxy::Result<Object> {
        self.inner.convert_proxy_to_object(proxy).await
    }
}
