//! Multi-protocol front-end for the boreal ID generator.
//!
//! One process serves a single [`boreal::Generator`] over four protocols:
//! the memcached text and binary protocols (sharing one TCP port or Unix
//! socket, told apart by the first byte of each connection), an HTTP API
//! and a gRPC API. All front-ends share the [`App`] state: the generator,
//! the idle-timeout setting and the connection/command counters reported
//! by STATS.

pub mod app;
pub mod config;
pub mod conn;
pub mod grpc;
pub mod http;
pub mod memcached;
pub mod proto;
pub mod telemetry;

pub use crate::app::{App, Stats};

/// Version string reported by VERSION, STATS and the stats endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
