//! Proxy Layer Error Types
//!
//! Resolution and conversion failures are local to one call. Call faults
//! raised by application code behind a handle are kept distinct from
//! proxy-layer failures so callers can tell transport problems from their
//! own bugs on the far side.

use thiserror::Error;

use object::ObjectError;

/// Application-level exception surfaced from a method call.
///
/// This is what the code behind a handle threw, as opposed to a failure of
/// the proxy machinery delivering the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallFault {
    pub message: String,
}

impl CallFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Main proxy layer error type
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Name resolution failed in an environment's namespace
    #[error("Lookup error: {name} in environment {environment}: {message}")]
    Lookup {
        environment: String,
        name: String,
        message: String,
    },

    /// Value-to-proxy or proxy-to-value conversion failed
    #[error("Conversion error: {message}")]
    Conversion {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The proxy machinery failed to deliver or complete a call
    #[error("Call error: {method}: {message}")]
    Call { method: String, message: String },

    /// Application code behind the handle raised an exception
    #[error("Call fault: {method}: {fault}")]
    Fault { method: String, fault: CallFault },

    /// Environment construction or factory failure
    #[error("Environment error: {variant}: {message}")]
    Environment { variant: String, message: String },

    /// The transport backing a remote environment is dead
    #[error("Connection inactive")]
    ConnectionInactive,

    /// Container contract violation bubbled up from the object layer
    #[error(transparent)]
    Object(#[from] ObjectError),
}

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn lookup(
        environment: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Lookup {
            environment: environment.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
            source: None,
        }
    }

    pub fn conversion_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Conversion {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn call(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn fault(method: impl Into<String>, fault: CallFault) -> Self {
        Self::Fault {
            method: method.into(),
            fault,
        }
    }

    pub fn environment(variant: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Environment {
            variant: variant.into(),
            message: message.into(),
        }
    }

    /// Whether this error is the application's own fault rather than a
    /// failure of the proxy machinery.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_distinguishable() {
        let fault = ProxyError::fault("work", CallFault::new("division by zero"));
        assert!(fault.is_fault());
        assert!(fault.to_string().contains("division by zero"));

        let call = ProxyError::call("work", "handle dropped");
        assert!(!call.is_fault());
    }
}
