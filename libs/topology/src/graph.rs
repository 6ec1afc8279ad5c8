//! Flow Graph Data Model
//!
//! Ports and flows are the edges of the declared and flattened graphs.
//! Identity is structural: a port is `(block uid, port name)`, a flow is its
//! two ports. An empty object reference marks a boundary port of the
//! enclosing sub-graph, which flattening resolves away.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use proxy::Proxy;

use crate::error::Result;

/// One endpoint of a flow. `obj` is `None` for a boundary port.
#[derive(Clone, Debug)]
pub struct Port {
    pub obj: Option<Proxy>,
    pub name: String,
    /// Uid of the owning block, empty for boundary ports.
    pub uid: String,
    /// Human-readable owner name, for error messages and logs.
    pub obj_name: String,
}

impl Port {
    /// Boundary port of the enclosing sub-graph.
    pub fn boundary(name: impl Into<String>) -> Self {
        Self {
            obj: None,
            name: name.into(),
            uid: String::new(),
            obj_name: String::new(),
        }
    }

    /// Port on a concrete block, querying the block for its identity.
    pub async fn from_proxy(obj: Proxy, name: impl Into<String>) -> Result<Self> {
        let uid: String = obj.call_as("uid", &[]).await?;
        let obj_name: String = obj.call_as("get_name", &[]).await?;
        Ok(Self {
            obj: Some(obj),
            name: name.into(),
            uid,
            obj_name,
        })
    }

    pub fn is_boundary(&self) -> bool {
        self.obj.is_none()
    }

    /// Label used in aggregated error messages.
    pub fn label(&self) -> String {
        if self.obj_name.is_empty() {
            format!("{}[{}]", self.uid, self.name)
        } else {
            format!("{}[{}]", self.obj_name, self.name)
        }
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid && self.name == other.name
    }
}

impl Eq for Port {}

impl Hash for Port {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
        self.name.hash(state);
    }
}

/// A directed edge from a source port to a destination port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Flow {
    pub src: Port,
    pub dst: Port,
}

impl Flow {
    pub fn new(src: Port, dst: Port) -> Self {
        Self { src, dst }
    }
}

/// Flows present in `a` but not in `b`, preserving `a`'s order.
pub(crate) fn flows_minus(a: &[Flow], b: &[Flow]) -> Vec<Flow> {
    a.iter().filter(|f| !b.contains(f)).cloned().collect()
}

/// A block pulled out of a flow list: a display label and the proxy the
/// engine messages it through.
#[derive(Clone)]
pub(crate) struct BlockRef {
    pub label: String,
    pub obj: Proxy,
}

/// Unique blocks referenced by `flows`, excluding any block that also
/// appears in `exclude`. Order follows first appearance.
pub(crate) fn block_set(flows: &[Flow], exclude: &[Flow]) -> Vec<BlockRef> {
    let mut excluded = HashSet::new();
    for flow in exclude {
        excluded.insert(flow.src.uid.clone());
        excluded.insert(flow.dst.uid.clone());
    }
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for flow in flows {
        for port in [&flow.src, &flow.dst] {
            let Some(obj) = &port.obj else { continue };
            if excluded.contains(&port.uid) || !seen.insert(port.uid.clone()) {
                continue;
            }
            let label = if port.obj_name.is_empty() {
                port.uid.clone()
            } else {
                port.obj_name.clone()
            };
            blocks.push(BlockRef {
                label,
                obj: obj.clone(),
            });
        }
    }
    blocks
}
