//! Environment Factory
//!
//! Process-wide registry of environment constructors keyed by variant
//! string. Environments are expensive (a remote variant holds a live
//! connection), so the factory caches weak references per (variant, args)
//! and hands out the existing instance while anyone still holds it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::environment::Environment;
use crate::error::{ProxyError, Result};

/// Construction arguments: arbitrary string key/value configuration
pub type EnvironmentArgs = BTreeMap<String, String>;

type MakerFn =
    Arc<dyn Fn(&EnvironmentArgs) -> Result<Arc<dyn Environment>> + Send + Sync>;

/// Variant-keyed environment constructor registry with a weak singleton
/// cache per construction-argument set.
#[derive(Default)]
pub struct EnvironmentFactory {
    makers: DashMap<String, MakerFn>,
    cache: Mutex<HashMap<(String, EnvironmentArgs), Weak<dyn Environment>>>,
}

impl EnvironmentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a variant identifier.
    pub fn register<F>(&self, variant: impl Into<String>, maker: F)
    where
        F: Fn(&EnvironmentArgs) -> Result<Arc<dyn Environment>> + Send + Sync + 'static,
    {
        self.makers.insert(variant.into(), Arc::new(maker));
    }

    /// Variant identifiers currently registered.
    pub fn variants(&self) -> Vec<String> {
        self.makers.iter().map(|e| e.key().clone()).collect()
    }

    /// Resolve an environment, reusing the cached instance when one is still
    /// alive for the same variant and argument set.
    pub fn make(&self, variant: &str, args: &EnvironmentArgs) -> Result<Arc<dyn Environment>> {
        let key = (variant.to_string(), args.clone());
        {
            let cache = self.cache.lock().expect("environment cache poisoned");
            if let Some(env) = cache.get(&key).and_then(Weak::upgrade) {
                return Ok(env);
            }
        }

        let maker = self
            .makers
            .get(variant)
            .ok_or_else(|| {
                ProxyError::environment(variant, "no such environment variant registered")
            })?
            .clone();
        let env = maker(args)?;
        debug!(variant = %variant, "constructed environment");

        let mut cache = self.cache.lock().expect("environment cache poisoned");
        // A racing caller may have built one meanwhile; keep the first.
        if let Some(existing) = cache.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        cache.insert(key, Arc::downgrade(&env));
        Ok(env)
    }
}
