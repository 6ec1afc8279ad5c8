//! In-Process Environment
//!
//! The "local" variant hosts objects in this process. Its handle wraps a
//! value container directly; conversion between values and proxies is
//! wrap/unwrap with no marshalling. Callable objects implement
//! [`CallTarget`], the runtime-call surface blocks and registries expose.

use std::any::Any;
use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use object::{Object, TypeRegistry};

use crate::environment::{process_identity, Environment};
use crate::error::{CallFault, ProxyError, Result};
use crate::proxy::{Handle, Proxy};

/// Invocable object surface: named methods over value arguments.
///
/// A [`CallFault`] return is the application's own exception; machinery
/// failures use the proxy error type at the layer above.
#[async_trait]
pub trait CallTarget: Send + Sync {
    async fn call(&self, name: &str, args: &[Object]) -> std::result::Result<Object, CallFault>;

    fn class_name(&self) -> &str;

    fn display(&self) -> String {
        format!("<{}>", self.class_name())
    }
}

/// Object reference type used to pass callable objects through containers.
pub type TargetRef = Arc<dyn CallTarget>;

/// In-process environment: a name table of callable objects plus the
/// wrap/unwrap conversion between containers and proxies.
pub struct LocalEnvironment {
    registry: Arc<TypeRegistry>,
    names: DashMap<String, TargetRef>,
    me: Weak<LocalEnvironment>,
}

impl LocalEnvironment {
    pub fn new(registry: Arc<TypeRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry,
            names: DashMap::new(),
            me: me.clone(),
        })
    }

    fn arc(&self) -> Arc<dyn Environment> {
        self.me.upgrade().expect("environment still alive") as Arc<dyn Environment>
    }

    /// Publish a callable object under a name resolvable by `find_proxy`.
    pub fn register(&self, name: impl Into<String>, target: TargetRef) {
        self.names.insert(name.into(), target);
    }

    pub fn unregister(&self, name: &str) -> Option<TargetRef> {
        self.names.remove(name).map(|(_, t)| t)
    }

    /// Wrap a callable object into a proxy of this environment.
    pub fn proxy_for_target(&self, target: TargetRef) -> Proxy {
        self.proxy_for_object(Object::wrap(target))
    }

    /// Wrap any container into a proxy of this environment.
    pub fn proxy_for_object(&self, obj: Object) -> Proxy {
        let handle = Arc::new(LocalHandle {
            env: self.me.clone(),
            value: obj,
        });
        Proxy::new(self.arc(), handle)
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn variant(&self) -> &str {
        "local"
    }

    fn unique_pid(&self) -> &str {
        &process_identity().unique_pid
    }

    fn node_id(&self) -> &str {
        &process_identity().node_id
    }

    fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    async fn find_proxy(&self, name: &str) -> Result<Proxy> {
        let target = self
            .names
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProxyError::lookup("local", name, "name not registered"))?;
        trace!(name = %name, "resolved local proxy");
        Ok(self.proxy_for_target(target))
    }

    async fn convert_object_to_proxy(&self, obj: Object) -> Result<Proxy> {
        Ok(self.proxy_for_object(obj))
    }

    async fn convert_proxy_to_object(&self, proxy: &Proxy) -> Result<Object> {
        let handle = proxy
            .handle()
            .as_any()
            .downcast_ref::<LocalHandle>()
            .ok_or_else(|| {
                ProxyError::conversion("proxy does not belong to a local environment")
            })?;
        Ok(handle.value.clone())
    }
}

/// Handle of the local environment: the value container itself.
pub struct LocalHandle {
    env: Weak<LocalEnvironment>,
    value: Object,
}

impl LocalHandle {
    fn env(&self) -> Result<Arc<LocalEnvironment>> {
        self.env
            .upgrade()
            .ok_or_else(|| ProxyError::environment("local", "environment dropped"))
    }

    fn target(&self) -> Option<&TargetRef> {
        self.value.extract::<TargetRef>().ok()
    }
}

#[async_trait]
impl Handle for LocalHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn call(&self, name: &str, args: &[Proxy]) -> Result<Proxy> {
        let env = self.env()?;
        let target = self
            .target()
            .ok_or_else(|| ProxyError::call(name, format!("{} is not callable", self.value)))?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(env.convert_proxy_to_object(arg).await?);
        }

        let result = target
            .call(name, &values)
            .await
            .map_err(|fault| ProxyError::fault(name, fault))?;
        Ok(env.proxy_for_object(result))
    }

    async fn compare_to(&self, other: &Proxy) -> Result<Ordering> {
        let env = self.env()?;
        let other_handle = other
            .handle()
            .as_any()
            .downcast_ref::<LocalHandle>()
            .ok_or_else(|| {
                ProxyError::conversion("compare across environments requires an explicit convert")
            })?;
        Ok(env.registry.compare(&self.value, &other_handle.value)?)
    }

    async fn hash_code(&self) -> Result<u64> {
        Ok(self.env()?.registry.hash_code(&self.value))
    }

    async fn display(&self) -> Result<String> {
        Ok(match self.target() {
            Some(target) => target.display(),
            None => self.value.to_string(),
        })
    }

    async fn class_name(&self) -> Result<String> {
        Ok(match self.target() {
            Some(target) => target.class_name().to_string(),
            None => self.value.type_name().to_string(),
        })
    }
}
