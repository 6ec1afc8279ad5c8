//! # Lattice Value Container
//!
//! Reference-counted, type-erased value holder used as the payload of every
//! cross-environment interaction: RPC message fields, proxy call arguments
//! and results all travel as [`Object`] containers.
//!
//! ## Architecture Role
//!
//! ```text
//! object → proxy → remote
//!    ↑        ↑       ↑
//! payloads  handles  wire frames
//! ```
//!
//! The container itself knows only how to store, share and extract values.
//! Conversion, comparison, hashing and serialization are capabilities looked
//! up in an injected [`TypeRegistry`], so the set of supported types is
//! decided by the application at startup rather than baked into this crate.
//!
//! ## What This Crate Does NOT Contain
//! - Network transport or framing (belongs in `remote`)
//! - Proxy or environment semantics (belongs in `proxy`)

pub mod error;
pub mod registry;
pub mod value;
pub mod wire;

pub use error::{ObjectError, Result};
pub use registry::{TypeRegistry, TypeRegistryBuilder, NULL_TAG};
pub use value::{Object, NULL_TYPE_NAME};
pub use wire::{decode_kwargs, encode_kwargs, Kwargs, WireKwargs, WireValue};
