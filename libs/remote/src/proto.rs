//! Message Field Helpers
//!
//! Typed accessors over the string-keyed argument maps both peers exchange.
//! Requests carry `action` and `request_id`; replies echo `request_id` and
//! carry result fields, an `error_msg` (transport-level failure) or a
//! `fault` (application-level exception from a `call` action).

use object::{Kwargs, Object};

use crate::error::{RemoteError, Result};

pub(crate) fn field_obj(kwargs: &Kwargs, key: &str) -> Result<Object> {
    kwargs
        .get(key)
        .cloned()
        .ok_or_else(|| RemoteError::protocol(format!("missing field: {}", key)))
}

pub(crate) fn field_u64(kwargs: &Kwargs, key: &str) -> Result<u64> {
    field_obj(kwargs, key)?
        .extract::<u64>()
        .copied()
        .map_err(|e| RemoteError::protocol(format!("field {}: {}", key, e)))
}

pub(crate) fn field_i64(kwargs: &Kwargs, key: &str) -> Result<i64> {
    field_obj(kwargs, key)?
        .extract::<i64>()
        .copied()
        .map_err(|e| RemoteError::protocol(format!("field {}: {}", key, e)))
}

pub(crate) fn field_str(kwargs: &Kwargs, key: &str) -> Result<String> {
    field_obj(kwargs, key)?
        .extract::<String>()
        .cloned()
        .map_err(|e| RemoteError::protocol(format!("field {}: {}", key, e)))
}

/// Transport-level failure reported by the peer, if any.
pub(crate) fn reply_error(kwargs: &Kwargs) -> Option<String> {
    kwargs
        .get("error_msg")
        .and_then(|obj| obj.extract::<String>().ok())
        .cloned()
}

/// Application-level exception reported by the peer, if any.
pub(crate) fn reply_fault(kwargs: &Kwargs) -> Option<String> {
    kwargs
        .get("fault")
        .and_then(|obj| obj.extract::<String>().ok())
        .cloned()
}
