//! RPC Endpoint Configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::DEFAULT_MAX_FRAME_SIZE;

/// Client-side connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Maximum accepted frame size
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Server-side listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local address to bind to
    pub bind_address: SocketAddr,
    /// Maximum accepted frame size
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".parse().expect("valid default address"),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
