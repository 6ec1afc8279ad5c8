//! Environment Capability Surface
//!
//! An environment is a named execution context (this process, a remote peer,
//! another runtime) able to host objects and service calls against them.
//! Every variant independently implements the same trait; there is no shared
//! base state, only the capability set.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use uuid::Uuid;

use object::{Object, TypeRegistry};

use crate::error::Result;
use crate::proxy::Proxy;

/// Capability surface every execution environment implements.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Variant identifier this environment was selected by ("local",
    /// "remote", a language-runtime name).
    fn variant(&self) -> &str;

    /// Unique id of the OS process hosting the environment's objects.
    ///
    /// Two proxies whose environments report the same unique pid can reach
    /// each other without crossing a process boundary.
    fn unique_pid(&self) -> &str;

    /// Identifier of the machine hosting the environment.
    fn node_id(&self) -> &str;

    /// Capability registry for values handled by this environment.
    fn registry(&self) -> &Arc<TypeRegistry>;

    /// Create-or-find a named object in this environment's namespace.
    async fn find_proxy(&self, name: &str) -> Result<Proxy>;

    /// Convert a local value into a reference hosted by this environment.
    async fn convert_object_to_proxy(&self, obj: Object) -> Result<Proxy>;

    /// Convert a reference back into a local value.
    async fn convert_proxy_to_object(&self, proxy: &Proxy) -> Result<Object>;
}

/// Identity of the current OS process as seen by environments.
pub struct ProcessIdentity {
    /// Process-unique id: stable for the process lifetime, distinct across
    /// restarts (the OS pid alone is recyclable).
    pub unique_pid: String,
    /// Machine identifier.
    pub node_id: String,
}

static PROCESS_IDENTITY: Lazy<ProcessIdentity> = Lazy::new(|| ProcessIdentity {
    unique_pid: format!("{}-{}", std::process::id(), Uuid::new_v4().simple()),
    node_id: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
});

/// Lazily-computed identity shared by every local environment in the process.
pub fn process_identity() -> &'static ProcessIdentity {
    &PROCESS_IDENTITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_identity_stable() {
        let a = process_identity();
        let b = process_identity();
        assert_eq!(a.unique_pid, b.unique_pid);
        assert!(!a.unique_pid.is_empty());
        assert!(!a.node_id.is_empty());
    }
}
