//! Recursive Flow Resolution
//!
//! Flattening turns the declared graph, which may reference sub-topologies
//! through boundary ports, into concrete leaf-to-leaf flows. Each declared
//! flow expands into the cross product of the leaf ports its two ends
//! resolve to. Resolution hops through sub-topologies by proxy call, so a
//! nested graph may live in another process; a depth guard turns
//! sub-topology cycles into a defined error instead of unbounded recursion.

use object::Object;
use proxy::Proxy;

use crate::error::{Result, TopologyError};
use crate::graph::{Flow, Port};

pub(crate) const MAX_RESOLVE_DEPTH: u64 = 64;

pub(crate) async fn is_sub_topology(obj: &Proxy) -> bool {
    obj.class_name()
        .await
        .map(|name| name == "Topology")
        .unwrap_or(false)
}

/// Leaf ports reachable from `port`. A port on a plain block is itself; a
/// port on a sub-topology expands into whatever its boundary connects to.
pub(crate) async fn resolve_port(port: &Port, is_source: bool, depth: u64) -> Result<Vec<Port>> {
    if depth > MAX_RESOLVE_DEPTH {
        return Err(TopologyError::resolve(format!(
            "resolution exceeded depth {} at {}; sub-topology cycle suspected",
            MAX_RESOLVE_DEPTH,
            port.label()
        )));
    }
    let Some(obj) = &port.obj else {
        // a dangling boundary port connects to nothing
        return Ok(Vec::new());
    };
    if !is_sub_topology(obj).await {
        return Ok(vec![port.clone()]);
    }
    let reply = obj
        .call_object(
            "resolve_ports",
            &[
                Object::wrap(port.name.clone()),
                Object::wrap(is_source),
                Object::wrap(depth + 1),
            ],
        )
        .await?;
    Ok(reply.extract::<Vec<Port>>()?.clone())
}

/// Resolve every declared flow to leaf-only flows. Flows touching a
/// boundary port of the enclosing graph are skipped here; the parent graph
/// resolves through them instead.
pub(crate) async fn flatten(declared: &[Flow]) -> Result<Vec<Flow>> {
    let mut flat: Vec<Flow> = Vec::new();
    for flow in declared {
        if flow.src.is_boundary() || flow.dst.is_boundary() {
            continue;
        }
        let srcs = resolve_port(&flow.src, true, 0).await?;
        let dsts = resolve_port(&flow.dst, false, 0).await?;
        for src in &srcs {
            for dst in &dsts {
                let resolved = Flow::new(src.clone(), dst.clone());
                if !flat.contains(&resolved) {
                    flat.push(resolved);
                }
            }
        }
    }
    Ok(flat)
}
