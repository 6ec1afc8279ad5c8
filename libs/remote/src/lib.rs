//! Network transparency for environments
//!
//! One connection, many callers: requests are tagged with a monotonically
//! increasing id, framed with a length prefix, and multiplexed over a
//! single byte stream. [`RemoteEnvironment`] is the client side, exposing a
//! peer's environments through the same [`Environment`](proxy::Environment)
//! trait local code uses; [`RemoteServer`] is the accept loop that serves
//! them.

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
mod proto;
pub mod server;

pub use client::{RemoteEnvironment, RemoteHandle};
pub use config::{ClientConfig, ServerConfig};
pub use error::{RemoteError, Result};
pub use frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
pub use server::{serve_connection, RemoteServer};
