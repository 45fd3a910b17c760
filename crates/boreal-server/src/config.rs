//! Runtime configuration for the `boreal` binary.

use clap::Parser;
use std::path::PathBuf;

/// Command-line and environment configuration.
///
/// The memcached protocol listens on either `--port` or the Unix socket
/// given by `--sock`; the socket path wins when both are set. The HTTP
/// and gRPC front-ends are enabled by giving their ports.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "boreal",
    version,
    about = "A distributed unique-ID generation service"
)]
pub struct CliArgs {
    /// Worker ID of this instance (0..=1023). Distinct instances must use
    /// distinct worker IDs for their IDs to stay disjoint.
    #[arg(long, env = "BOREAL_WORKER_ID")]
    pub worker_id: u64,

    /// TCP port for the memcached protocol.
    #[arg(long, env = "BOREAL_PORT", default_value_t = 11212)]
    pub port: u16,

    /// Unix domain socket path for the memcached protocol; takes
    /// precedence over --port.
    #[arg(long, env = "BOREAL_SOCK")]
    pub sock: Option<PathBuf>,

    /// Seconds a connection may stay idle before it is closed; 0 disables
    /// the deadline.
    #[arg(long, env = "BOREAL_IDLE_TIMEOUT", default_value_t = 600)]
    pub idle_timeout: u64,

    /// Log level (error, warn, info, debug, trace); RUST_LOG overrides.
    #[arg(long, env = "BOREAL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// TCP port for the HTTP front-end; 0 disables it.
    #[arg(long, env = "BOREAL_HTTP_PORT", default_value_t = 0)]
    pub http_port: u16,

    /// Path prefix for the HTTP endpoints, e.g. "v1/" serves /v1/id.
    #[arg(long, env = "BOREAL_HTTP_PATH_PREFIX", default_value = "")]
    pub http_path_prefix: String,

    /// TCP port for the gRPC front-end; 0 disables it.
    #[arg(long, env = "BOREAL_GRPC_PORT", default_value_t = 0)]
    pub grpc_port: u16,
}
