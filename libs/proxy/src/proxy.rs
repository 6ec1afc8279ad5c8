//! Proxy and Handle
//!
//! A `Proxy` is a portable reference to an object living in some environment:
//! the pair of a shared environment and an environment-specific handle. The
//! handle is opaque outside the environment that created it; moving a proxy
//! into a different environment goes through the explicit convert step.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use object::Object;

use crate::environment::Environment;
use crate::error::Result;

/// Environment-specific state backing a proxy.
///
/// A handle is only ever dereferenced by the environment that created it.
/// Implementations that refer to remote state send a best-effort release
/// notification when dropped.
#[async_trait]
pub trait Handle: Send + Sync {
    /// Downcast support: environments recognize their own handles with this.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Invoke a named method with proxy arguments, producing a new proxy.
    async fn call(&self, name: &str, args: &[Proxy]) -> Result<Proxy>;

    /// Three-way comparison against another proxy of the same environment.
    async fn compare_to(&self, other: &Proxy) -> Result<Ordering>;

    /// Hash code of the referenced object.
    async fn hash_code(&self) -> Result<u64>;

    /// Human-readable rendering of the referenced object.
    async fn display(&self) -> Result<String>;

    /// Class name of the referenced object.
    async fn class_name(&self) -> Result<String>;
}

/// Portable reference to an object hosted by an [`Environment`].
#[derive(Clone)]
pub struct Proxy {
    env: Arc<dyn Environment>,
    handle: Arc<dyn Handle>,
}

impl Proxy {
    pub fn new(env: Arc<dyn Environment>, handle: Arc<dyn Handle>) -> Self {
        Self { env, handle }
    }

    /// The environment hosting the referenced object. Shared ownership: the
    /// environment lives as long as its longest-held proxy.
    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    pub fn handle(&self) -> &Arc<dyn Handle> {
        &self.handle
    }

    /// Invoke a method by name with proxy arguments.
    pub async fn call(&self, name: &str, args: &[Proxy]) -> Result<Proxy> {
        self.handle.call(name, args).await
    }

    /// Invoke a method with value arguments, converting them into this
    /// proxy's environment first.
    pub async fn call_with(&self, name: &str, args: &[Object]) -> Result<Proxy> {
        let mut proxies = Vec::with_capacity(args.len());
        for arg in args {
            proxies.push(self.env.convert_object_to_proxy(arg.clone()).await?);
        }
        self.handle.call(name, &proxies).await
    }

    /// Invoke a method and convert the result back to a local value.
    pub async fn call_object(&self, name: &str, args: &[Object]) -> Result<Object> {
        let result = self.call_with(name, args).await?;
        self.env.convert_proxy_to_object(&result).await
    }

    /// Invoke a method and extract a typed result.
    pub async fn call_as<T>(&self, name: &str, args: &[Object]) -> Result<T>
    where
        T: std::any::Any + Send + Sync + Clone,
    {
        let obj = self.call_object(name, args).await?;
        Ok(self.env.registry().convert_to::<T>(&obj)?)
    }

    pub async fn compare_to(&self, other: &Proxy) -> Result<Ordering> {
        self.handle.compare_to(other).await
    }

    pub async fn hash_code(&self) -> Result<u64> {
        self.handle.hash_code().await
    }

    pub async fn display(&self) -> Result<String> {
        self.handle.display().await
    }

    pub async fn class_name(&self) -> Result<String> {
        self.handle.class_name().await
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("variant", &self.env.variant())
            .field("unique_pid", &self.env.unique_pid())
            .finish()
    }
}
