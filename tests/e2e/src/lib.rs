//! End-to-end test support
//!
//! Fixtures shared by the integration tests in `tests/`: a background RPC
//! server over real loopback TCP, an inspectable host environment, and a
//! call target with tunable latency for multiplexing scenarios.

pub mod fixtures;

pub use fixtures::{init_tracing, shared_host, spawn_server, DelayedEcho};
