//! Topology Engine
//!
//! Owns the declared flow graph and reconciles it against the running
//! blocks on `commit`: flatten through sub-topologies, insert network
//! bridges where a flow crosses a process boundary, diff against the last
//! committed set, then drive the subscribe/activate protocol in strict
//! order. Between commits only the declared layer mutates.
//!
//! Commit messaging order: subscribe new data acceptors, subscribe new data
//! providers, unsubscribe old providers, unsubscribe old acceptors, then
//! activate newly seen blocks and deactivate unreferenced ones. Each phase
//! sends every message before failures are raised as one aggregate, so a
//! failed commit may leave the graph partially rewired.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use object::Object;
use proxy::{CallFault, CallTarget, LocalEnvironment, Proxy, TargetRef};

use crate::block::arg_str;
use crate::error::{Result, TopologyError};
use crate::graph::{block_set, flows_minus, BlockRef, Flow, Port};
use crate::registry::REGISTRY_NAME;
use crate::resolve::{flatten, is_sub_topology, resolve_port};

/// One end of a `connect`/`disconnect`: a block proxy or a topology. A
/// topology endpoint that is the topology being connected on declares a
/// boundary port; any other topology endpoint is a sub-graph.
pub enum Endpoint {
    Block(Proxy),
    Topology(Arc<Topology>),
}

impl From<Proxy> for Endpoint {
    fn from(proxy: Proxy) -> Self {
        Self::Block(proxy)
    }
}

impl From<Arc<Topology>> for Endpoint {
    fn from(topology: Arc<Topology>) -> Self {
        Self::Topology(topology)
    }
}

impl From<&Arc<Topology>> for Endpoint {
    fn from(topology: &Arc<Topology>) -> Self {
        Self::Topology(Arc::clone(topology))
    }
}

/// Bridge reuse key: one bridge pair per source port and destination
/// process, shared by every flow fanning out from that port to that
/// process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BridgeKey {
    src_uid: String,
    src_port: String,
    dst_upid: String,
}

#[derive(Clone)]
struct BridgeEntry {
    sink_in: Port,
    source_out: Port,
}

pub struct Topology {
    uid: String,
    name: Mutex<String>,
    env: Arc<LocalEnvironment>,
    flows: Mutex<Vec<Flow>>,
    active_flat_flows: Mutex<Vec<Flow>>,
    bridge_cache: Mutex<HashMap<BridgeKey, BridgeEntry>>,
    // commit is single-writer per topology
    commit_lock: tokio::sync::Mutex<()>,
    me: Weak<Topology>,
}

impl Topology {
    /// An empty topology hosted in `env`. The environment wraps this
    /// topology as a callable object when it is used as a sub-graph.
    pub fn new(env: Arc<LocalEnvironment>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            uid: Uuid::new_v4().simple().to_string(),
            name: Mutex::new("Topology".to_string()),
            env,
            flows: Mutex::new(Vec::new()),
            active_flat_flows: Mutex::new(Vec::new()),
            bridge_cache: Mutex::new(HashMap::new()),
            commit_lock: tokio::sync::Mutex::new(()),
            me: me.clone(),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().unwrap() = name.into();
    }

    /// This topology as a callable proxy in its own environment.
    pub fn as_proxy(&self) -> Proxy {
        let me = self.me.upgrade().expect("topology alive");
        self.env.proxy_for_target(me as TargetRef)
    }

    pub fn declared_flows(&self) -> Vec<Flow> {
        self.flows.lock().unwrap().clone()
    }

    pub fn active_flows(&self) -> Vec<Flow> {
        self.active_flat_flows.lock().unwrap().clone()
    }

    /// Number of live bridge pairs, one per (source port, destination
    /// process).
    pub fn bridge_count(&self) -> usize {
        self.bridge_cache.lock().unwrap().len()
    }

    async fn endpoint_port(&self, endpoint: Endpoint, name: &str) -> Result<Port> {
        let proxy = match endpoint {
            Endpoint::Topology(t) if t.uid == self.uid => return Ok(Port::boundary(name)),
            Endpoint::Topology(t) => t.as_proxy(),
            Endpoint::Block(proxy) => proxy,
        };
        Port::from_proxy(proxy, name).await.map_err(|e| {
            TopologyError::connect(format!("endpoint for port {} is not a block: {}", name, e))
        })
    }

    /// Declare a flow. Duplicate declarations are an error.
    pub async fn connect(
        &self,
        src: impl Into<Endpoint>,
        src_name: &str,
        dst: impl Into<Endpoint>,
        dst_name: &str,
    ) -> Result<()> {
        let src = self.endpoint_port(src.into(), src_name).await?;
        let dst = self.endpoint_port(dst.into(), dst_name).await?;
        let flow = Flow::new(src, dst);
        let mut flows = self.flows.lock().unwrap();
        if flows.contains(&flow) {
            return Err(TopologyError::connect("this flow already exists"));
        }
        flows.push(flow);
        Ok(())
    }

    /// Remove a declared flow. Removing a flow that was never declared is
    /// an error.
    pub async fn disconnect(
        &self,
        src: impl Into<Endpoint>,
        src_name: &str,
        dst: impl Into<Endpoint>,
        dst_name: &str,
    ) -> Result<()> {
        let src = self.endpoint_port(src.into(), src_name).await?;
        let dst = self.endpoint_port(dst.into(), dst_name).await?;
        let flow = Flow::new(src, dst);
        let mut flows = self.flows.lock().unwrap();
        match flows.iter().position(|f| f == &flow) {
            Some(i) => {
                flows.remove(i);
                Ok(())
            }
            None => Err(TopologyError::connect("this flow does not exist")),
        }
    }

    /// Clear the declared layer, recursing into sub-topology endpoints.
    /// Does not commit.
    pub async fn disconnect_all(&self) -> Result<()> {
        let flows = self.declared_flows();
        for flow in &flows {
            for port in [&flow.src, &flow.dst] {
                let Some(obj) = &port.obj else { continue };
                if is_sub_topology(obj).await {
                    obj.call_with("disconnect_all", &[]).await?;
                }
            }
        }
        self.flows.lock().unwrap().clear();
        Ok(())
    }

    /// Reconcile the running graph with the declared graph.
    pub async fn commit(&self) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        let declared = self.declared_flows();
        let squashed = flatten(&declared).await?;
        let flat = self.bridge_flows(&squashed).await?;
        let active = self.active_flows();
        let added = flows_minus(&flat, &active);
        let removed = flows_minus(&active, &flat);
        debug!(
            added = added.len(),
            removed = removed.len(),
            "reconciling flows"
        );

        message_flows(&added, SubscribeAction::SubscribeInput).await?;
        message_flows(&added, SubscribeAction::SubscribeOutput).await?;
        message_flows(&removed, SubscribeAction::UnsubscribeOutput).await?;
        message_flows(&removed, SubscribeAction::UnsubscribeInput).await?;

        let mut errors = Vec::new();
        errors.extend(set_active(&block_set(&added, &active), true).await);
        *self.active_flat_flows.lock().unwrap() = flat.clone();
        errors.extend(set_active(&block_set(&removed, &flat), false).await);

        // keep only bridges some current flow still rides; a future
        // re-bridge of an evicted flow builds a fresh pair. This runs even
        // when activation failed, so a failed commit never leaves a
        // torn-down pair cached for reuse.
        self.bridge_cache
            .lock()
            .unwrap()
            .retain(|key, _| squashed.iter().any(|flow| key_matches(key, flow)));

        if !errors.is_empty() {
            return Err(TopologyError::aggregate(errors));
        }
        Ok(())
    }

    /// Replace process-crossing flows with their bridge pair flows,
    /// creating or reusing one bridge per (source port, destination
    /// process).
    async fn bridge_flows(&self, squashed: &[Flow]) -> Result<Vec<Flow>> {
        let mut flat: Vec<Flow> = Vec::new();
        for flow in squashed {
            let (Some(src_obj), Some(dst_obj)) = (&flow.src.obj, &flow.dst.obj) else {
                continue;
            };
            let dst_upid = dst_obj.environment().unique_pid().to_string();
            if src_obj.environment().unique_pid() == dst_upid {
                push_unique(&mut flat, flow.clone());
                continue;
            }
            let key = BridgeKey {
                src_uid: flow.src.uid.clone(),
                src_port: flow.src.name.clone(),
                dst_upid,
            };
            let cached = self.bridge_cache.lock().unwrap().get(&key).cloned();
            let entry = match cached {
                Some(entry) => entry,
                None => {
                    let entry = make_bridge(src_obj, dst_obj, &flow.src).await?;
                    self.bridge_cache
                        .lock()
                        .unwrap()
                        .insert(key, entry.clone());
                    entry
                }
            };
            push_unique(&mut flat, Flow::new(flow.src.clone(), entry.sink_in.clone()));
            push_unique(&mut flat, Flow::new(entry.source_out.clone(), flow.dst.clone()));
        }
        Ok(flat)
    }

    /// Block until every active block has been idle for `idle`, or `timeout`
    /// elapses (`Duration::ZERO` polls forever). Poll interval is a third of
    /// the idle duration.
    pub async fn wait_inactive(&self, idle: Duration, timeout: Duration) -> Result<bool> {
        let blocks = block_set(&self.active_flows(), &[]);
        let idle_ms = idle.as_millis() as u64;
        let started = Instant::now();
        loop {
            let mut all_idle = true;
            for block in &blocks {
                let observed: u64 = block.obj.call_as("activity_indicator", &[]).await?;
                if observed < idle_ms {
                    all_idle = false;
                    break;
                }
            }
            if all_idle {
                return Ok(true);
            }
            if !timeout.is_zero() && started.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(idle / 3).await;
        }
    }

    /// Tear everything down: clear the declared layer and commit the empty
    /// graph, unsubscribing and deactivating every running block.
    pub async fn shutdown(&self) -> Result<()> {
        self.disconnect_all().await?;
        self.commit().await
    }

    async fn resolve_boundary(&self, name: &str, is_source: bool, depth: u64) -> Result<Vec<Port>> {
        let flows = self.declared_flows();
        let mut ports = Vec::new();
        for flow in &flows {
            if is_source && flow.dst.is_boundary() && flow.dst.name == name {
                ports.extend(resolve_port(&flow.src, true, depth + 1).await?);
            }
            if !is_source && flow.src.is_boundary() && flow.src.name == name {
                ports.extend(resolve_port(&flow.dst, false, depth + 1).await?);
            }
        }
        Ok(ports)
    }
}

/// Sub-graph call surface: lets a parent topology, possibly in another
/// process, resolve through this one and tear it down.
#[async_trait]
impl CallTarget for Topology {
    async fn call(&self, name: &str, args: &[Object]) -> std::result::Result<Object, CallFault> {
        match name {
            "uid" => Ok(Object::wrap(self.uid.clone())),
            "get_name" => Ok(Object::wrap(self.name())),
            "set_name" => {
                self.set_name(arg_str(args, 0)?);
                Ok(Object::null())
            }
            "resolve_ports" => {
                let port_name = arg_str(args, 0)?;
                let is_source = arg_as::<bool>(args, 1)?;
                let depth = arg_as::<u64>(args, 2)?;
                let ports = self
                    .resolve_boundary(&port_name, is_source, depth)
                    .await
                    .map_err(|e| CallFault::new(e.to_string()))?;
                Ok(Object::wrap(ports))
            }
            "resolve_flows" => Ok(Object::wrap(self.declared_flows())),
            "disconnect_all" => {
                self.disconnect_all()
                    .await
                    .map_err(|e| CallFault::new(e.to_string()))?;
                Ok(Object::null())
            }
            other => Err(CallFault::new(format!("no method: {}", other))),
        }
    }

    fn class_name(&self) -> &str {
        "Topology"
    }

    fn display(&self) -> String {
        format!("<Topology {}>", self.name())
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        let active = match self.active_flat_flows.get_mut() {
            Ok(flows) => std::mem::take(&mut *flows),
            Err(_) => return,
        };
        if active.is_empty() {
            return;
        }
        // no caller exists to receive teardown failures, so only log them
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = message_flows(&active, SubscribeAction::UnsubscribeOutput).await
                    {
                        warn!(error = %e, "teardown unsubscribe failed");
                    }
                    if let Err(e) = message_flows(&active, SubscribeAction::UnsubscribeInput).await {
                        warn!(error = %e, "teardown unsubscribe failed");
                    }
                    for error in set_active(&block_set(&active, &[]), false).await {
                        warn!(error = %error, "teardown deactivate failed");
                    }
                });
            }
            Err(_) => {
                warn!("topology dropped with active flows outside a runtime; blocks left running");
            }
        }
    }
}

fn arg_as<T>(args: &[Object], index: usize) -> std::result::Result<T, CallFault>
where
    T: std::any::Any + Copy,
{
    let obj = args
        .get(index)
        .ok_or_else(|| CallFault::new(format!("missing argument {}", index)))?;
    obj.extract::<T>()
        .copied()
        .map_err(|e| CallFault::new(format!("argument {}: {}", index, e)))
}

fn push_unique(flows: &mut Vec<Flow>, flow: Flow) {
    if !flows.contains(&flow) {
        flows.push(flow);
    }
}

fn key_matches(key: &BridgeKey, flow: &Flow) -> bool {
    if flow.src.uid != key.src_uid || flow.src.name != key.src_port {
        return false;
    }
    flow.dst
        .obj
        .as_ref()
        .map(|obj| obj.environment().unique_pid() == key.dst_upid)
        .unwrap_or(false)
}

/// Build a bridge pair for flows out of `src_port` into the destination's
/// process, via the block registries of the two environments.
async fn make_bridge(src_obj: &Proxy, dst_obj: &Proxy, src_port: &Port) -> Result<BridgeEntry> {
    let src_registry = src_obj.environment().find_proxy(REGISTRY_NAME).await?;
    let dst_registry = dst_obj.environment().find_proxy(REGISTRY_NAME).await?;

    let sink = src_registry.call_with("/blocks/bridge_sink", &[]).await?;
    let address: String = sink.call_as("rendezvous_address", &[]).await?;
    let source = dst_registry
        .call_with("/blocks/bridge_source", &[Object::wrap(address)])
        .await?;

    sink.call_with(
        "set_name",
        &[Object::wrap(format!("NetTo: {}", src_port.label()))],
    )
    .await?;
    source
        .call_with(
            "set_name",
            &[Object::wrap(format!("NetFrom: {}", src_port.label()))],
        )
        .await?;

    debug!(src = %src_port.label(), "inserted network bridge pair");
    Ok(BridgeEntry {
        sink_in: Port::from_proxy(sink, "0").await?,
        source_out: Port::from_proxy(source, "0").await?,
    })
}

#[derive(Clone, Copy)]
enum SubscribeAction {
    SubscribeInput,
    SubscribeOutput,
    UnsubscribeOutput,
    UnsubscribeInput,
}

impl SubscribeAction {
    fn method(self) -> &'static str {
        match self {
            Self::SubscribeInput => "subscribe_input",
            Self::SubscribeOutput => "subscribe_output",
            Self::UnsubscribeOutput => "unsubscribe_output",
            Self::UnsubscribeInput => "unsubscribe_input",
        }
    }

    /// Input-side actions go to the source block, output-side actions to
    /// the destination block.
    fn targets_source(self) -> bool {
        matches!(self, Self::SubscribeInput | Self::UnsubscribeInput)
    }
}

/// Send one subscription action for every flow, await all results, and
/// raise the failures as one aggregate after every message went out.
async fn message_flows(flows: &[Flow], action: SubscribeAction) -> Result<()> {
    let method = action.method();
    let mut calls = Vec::new();
    for flow in flows {
        let (pri, sec) = if action.targets_source() {
            (&flow.src, &flow.dst)
        } else {
            (&flow.dst, &flow.src)
        };
        let Some(obj) = pri.obj.clone() else { continue };
        let label = format!("{}.{}", pri.label(), method);
        let args = vec![
            Object::wrap(pri.name.clone()),
            Object::wrap(sec.uid.clone()),
            Object::wrap(sec.name.clone()),
        ];
        calls.push(async move { (label, obj.call_with(method, &args).await) });
    }
    let mut errors = Vec::new();
    for (label, outcome) in join_all(calls).await {
        if let Err(e) = outcome {
            errors.push(format!("{}: {}", label, e));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TopologyError::aggregate(errors))
    }
}

/// Activate or deactivate a set of blocks, returning failure strings for
/// the caller to aggregate with the other lifecycle phase.
async fn set_active(blocks: &[BlockRef], activate: bool) -> Vec<String> {
    let method = if activate { "activate" } else { "deactivate" };
    let calls = blocks.iter().map(|block| {
        let obj = block.obj.clone();
        let label = format!("{}.{}", block.label, method);
        async move { (label, obj.call_with(method, &[]).await) }
    });
    let mut errors = Vec::new();
    for (label, outcome) in join_all(calls).await {
        if let Err(e) = outcome {
            errors.push(format!("{}: {}", label, e));
        }
    }
    errors
}
