//! # Lattice Proxy Layer
//!
//! Defines the capability surface every execution environment implements
//! and the portable object references (proxies) that cross environment
//! boundaries. Concrete variants (the in-process environment here, the
//! network-backed environment in `remote`) are independent types behind one
//! trait, selected at runtime through a string-keyed factory.
//!
//! ## Architecture Role
//!
//! ```text
//! object → [proxy] → remote, topology
//!             ↓
//! Environment / Proxy / Handle traits
//! LocalEnvironment + CallTarget runtime surface
//! EnvironmentFactory (variant registry + weak singleton cache)
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Wire framing or sockets (belongs in `remote`)
//! - Flow graphs and block lifecycle (belongs in `topology`)

pub mod environment;
pub mod error;
pub mod factory;
pub mod local;
pub mod proxy;

pub use environment::{process_identity, Environment, ProcessIdentity};
pub use error::{CallFault, ProxyError, Result};
pub use factory::{EnvironmentArgs, EnvironmentFactory};
pub use local::{CallTarget, LocalEnvironment, LocalHandle, TargetRef};
pub use proxy::{Handle, Proxy};
