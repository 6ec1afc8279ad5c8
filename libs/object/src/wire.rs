//! Tagged Wire Forms
//!
//! Serialized representation of containers and the string-keyed argument
//! maps that RPC messages are made of. A value travels as a (tag, bytes)
//! pair; the codec registry on each side owns the mapping between tags and
//! concrete types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::TypeRegistry;
use crate::value::Object;

/// Serialized container: codec tag plus opaque payload bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireValue {
    pub tag: String,
    pub bytes: Vec<u8>,
}

/// String-keyed argument map, the payload of every RPC message
pub type Kwargs = BTreeMap<String, Object>;

/// Wire form of [`Kwargs`]
pub type WireKwargs = BTreeMap<String, WireValue>;

/// Serialize every entry of an argument map.
pub fn encode_kwargs(kwargs: &Kwargs, registry: &TypeRegistry) -> Result<WireKwargs> {
    kwargs
        .iter()
        .map(|(key, value)| Ok((key.clone(), registry.encode(value)?)))
        .collect()
}

/// Deserialize an argument map received from the wire.
pub fn decode_kwargs(wire: &WireKwargs, registry: &TypeRegistry) -> Result<Kwargs> {
    wire.iter()
        .map(|(key, value)| Ok((key.clone(), registry.decode(value)?)))
        .collect()
}
