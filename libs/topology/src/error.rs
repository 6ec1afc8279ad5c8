//! Topology Error Types

use object::ObjectError;
use proxy::ProxyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    /// Declared-layer failure: invalid endpoint, duplicate connect, or
    /// disconnect of a flow that was never connected.
    #[error("connect error: {message}")]
    Connect { message: String },

    /// Flattening could not reach concrete leaf ports, usually a
    /// sub-topology cycle or a boundary port nothing connects to.
    #[error("resolve error: {message}")]
    Resolve { message: String },

    /// One commit phase touched many flows and some of them failed. All
    /// messages of the phase were sent before this was raised, so the graph
    /// may be partially rewired.
    #[error("commit failures: {}", .errors.join("; "))]
    ConnectAggregate { errors: Vec<String> },

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Object(#[from] ObjectError),
}

impl TopologyError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    pub fn resolve(message: impl Into<String>) -> Self {
        Self::Resolve {
            message: message.into(),
        }
    }

    pub fn aggregate(errors: Vec<String>) -> Self {
        Self::ConnectAggregate { errors }
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_lists_every_failure() {
        let err = TopologyError::aggregate(vec![
            "a.activate: boom".into(),
            "b.subscribe_input: gone".into(),
        ]);
        let text = err.to_string();
        assert!(text.contains("a.activate: boom"));
        assert!(text.contains("b.subscribe_input: gone"));
    }
}
