//! Dataflow graph engine
//!
//! A [`Topology`] holds declared flows between block ports, possibly
//! nesting other topologies, and `commit` makes the running graph match:
//! flows are flattened to leaf blocks, flows that cross a process boundary
//! get an automatically inserted network bridge pair, and the affected
//! blocks are driven through the subscribe/activate protocol in an order
//! that connects producers before consumers see traffic and disconnects
//! them only after consumers stop expecting it.

pub mod block;
pub mod bridge;
pub mod error;
pub mod graph;
pub mod registry;
mod resolve;
pub mod testing;
pub mod topology;

pub use block::{Block, BlockEvent};
pub use bridge::{BridgeSink, BridgeSource};
pub use error::{Result, TopologyError};
pub use graph::{Flow, Port};
pub use registry::{install_registry, BlockRegistry, REGISTRY_NAME};
pub use topology::{Endpoint, Topology};
