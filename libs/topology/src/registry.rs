//! Block Registry
//!
//! Path-keyed block factory registered in a local environment under the
//! name `"registry"`. The engine finds it with `find_proxy("registry")` and
//! calls a path like `/blocks/bridge_sink` to construct a block in that
//! environment, which is how bridge halves get built in whichever process
//! each end of a cross-process flow lives in.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use object::{Object, TypeRegistry};
use proxy::{CallFault, CallTarget, LocalEnvironment, TargetRef};

use crate::block::arg_str;
use crate::bridge::{BridgeSink, BridgeSource};

type BlockMaker =
    Arc<dyn Fn(&[Object]) -> std::result::Result<TargetRef, CallFault> + Send + Sync>;

/// Registered name in every local environment that hosts blocks.
pub const REGISTRY_NAME: &str = "registry";

#[derive(Default)]
pub struct BlockRegistry {
    makers: DashMap<String, BlockMaker>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the bridge block makers. `registry` is the
    /// type registry the bridges encode payloads with.
    pub fn with_bridges(registry: Arc<TypeRegistry>) -> Self {
        let this = Self::new();
        let sink_registry = Arc::clone(&registry);
        this.register("/blocks/bridge_sink", move |_args| {
            let sink = BridgeSink::new(Arc::clone(&sink_registry))
                .map_err(|e| CallFault::new(format!("bridge sink bind: {}", e)))?;
            Ok(Arc::new(sink) as TargetRef)
        });
        this.register("/blocks/bridge_source", move |args| {
            let address = arg_str(args, 0)?;
            Ok(Arc::new(BridgeSource::new(address, Arc::clone(&registry))) as TargetRef)
        });
        this
    }

    pub fn register<F>(&self, path: impl Into<String>, maker: F)
    where
        F: Fn(&[Object]) -> std::result::Result<TargetRef, CallFault> + Send + Sync + 'static,
    {
        self.makers.insert(path.into(), Arc::new(maker));
    }

    /// Registered paths directly under `prefix`.
    pub fn list_children(&self, prefix: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .makers
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|path| path.starts_with(prefix))
            .collect();
        children.sort();
        children
    }

    fn make(&self, path: &str, args: &[Object]) -> std::result::Result<TargetRef, CallFault> {
        let maker = self
            .makers
            .get(path)
            .ok_or_else(|| CallFault::new(format!("no block registered at {}", path)))?
            .clone();
        maker(args)
    }
}

#[async_trait]
impl CallTarget for BlockRegistry {
    async fn call(&self, name: &str, args: &[Object]) -> std::result::Result<Object, CallFault> {
        // Block paths start with '/', registry methods do not.
        if name.starts_with('/') {
            let target = self.make(name, args)?;
            return Ok(Object::wrap(target));
        }
        match name {
            "list_children" => Ok(Object::wrap(self.list_children(&arg_str(args, 0)?))),
            other => Err(CallFault::new(format!("no method: {}", other))),
        }
    }

    fn class_name(&self) -> &str {
        "BlockRegistry"
    }
}

/// Register `registry` in `env` under the well-known name.
pub fn install_registry(env: &LocalEnvironment, registry: Arc<BlockRegistry>) {
    env.register(REGISTRY_NAME, registry as TargetRef);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    #[tokio::test]
    async fn makes_blocks_by_path() {
        let registry = BlockRegistry::new();
        registry.register("/blocks/null", |_args| {
            Ok(Arc::new(Block::new("null", &[], &[])) as TargetRef)
        });

        let made = registry.call("/blocks/null", &[]).await.unwrap();
        let target = made.extract::<TargetRef>().unwrap();
        assert_eq!(target.class_name(), "Block");

        let err = registry.call("/blocks/missing", &[]).await.unwrap_err();
        assert!(err.to_string().contains("no block registered"));
    }

    #[tokio::test]
    async fn lists_children_by_prefix() {
        let registry = BlockRegistry::new();
        registry.register("/blocks/a", |_| {
            Ok(Arc::new(Block::new("a", &[], &[])) as TargetRef)
        });
        registry.register("/blocks/b", |_| {
            Ok(Arc::new(Block::new("b", &[], &[])) as TargetRef)
        });
        registry.register("/other/c", |_| {
            Ok(Arc::new(Block::new("c", &[], &[])) as TargetRef)
        });

        let children = registry
            .call("list_children", &[Object::wrap("/blocks/".to_string())])
            .await
            .unwrap();
        assert_eq!(
            children.extract::<Vec<String>>().unwrap(),
            &vec!["/blocks/a".to_string(), "/blocks/b".to_string()]
        );
    }

    #[tokio::test]
    async fn bridge_paths_are_preloaded() {
        let registry = BlockRegistry::with_bridges(Arc::new(TypeRegistry::with_builtins()));
        let children = registry.list_children("/blocks/");
        assert_eq!(
            children,
            vec![
                "/blocks/bridge_sink".to_string(),
                "/blocks/bridge_source".to_string()
            ]
        );
    }
}
