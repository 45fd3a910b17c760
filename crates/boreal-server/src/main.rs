//! The `boreal` server binary.
//!
//! Binds the configured listeners, spawns one server task per enabled
//! front-end and waits for ctrl-c or SIGTERM. Any fatal startup error
//! exits with status 1.

use anyhow::Context;
use boreal_server::app::App;
use boreal_server::config::CliArgs;
use boreal_server::conn::Listener;
use boreal_server::{grpc, http, memcached, telemetry};
use clap::Parser;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    telemetry::init(&args.log_level)?;

    let app = App::new(args.worker_id, Duration::from_secs(args.idle_timeout))?;
    info!(
        worker_id = args.worker_id,
        version = boreal_server::VERSION,
        "starting"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let mut servers = JoinSet::new();

    let listener = bind_memcached_listener(&args).await?;
    servers.spawn(memcached::serve(listener, app.clone(), shutdown.clone()));

    if args.http_port > 0 {
        let listener = TcpListener::bind(("0.0.0.0", args.http_port))
            .await
            .with_context(|| format!("failed to listen on http port {}", args.http_port))?;
        let prefix = args.http_path_prefix.clone();
        let app = app.clone();
        let token = shutdown.clone();
        servers.spawn(async move { http::serve(listener, app, &prefix, token).await });
    }

    if args.grpc_port > 0 {
        let listener = TcpListener::bind(("0.0.0.0", args.grpc_port))
            .await
            .with_context(|| format!("failed to listen on grpc port {}", args.grpc_port))?;
        servers.spawn(grpc::serve(listener, app.clone(), shutdown.clone()));
    }

    let mut result = Ok(());
    while let Some(joined) = servers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "server failed");
                shutdown.cancel();
                result = Err(err);
            }
            Err(err) => {
                error!(error = %err, "server task aborted");
                shutdown.cancel();
                result = Err(err.into());
            }
        }
    }

    if let Some(path) = &args.sock {
        // Best effort; a crashed process may leave the file behind anyway.
        let _ = std::fs::remove_file(path);
    }

    info!("shut down");
    result
}

async fn bind_memcached_listener(args: &CliArgs) -> anyhow::Result<Listener> {
    if let Some(path) = &args.sock {
        #[cfg(unix)]
        {
            let listener = tokio::net::UnixListener::bind(path)
                .with_context(|| format!("failed to bind unix socket {}", path.display()))?;
            return Ok(Listener::Unix(listener));
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            anyhow::bail!("unix domain sockets are not supported on this platform");
        }
    }
    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to listen on port {}", args.port))?;
    Ok(Listener::Tcp(listener))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = signal::ctrl_c() => {
            if let Err(err) = res {
                error!(error = %err, "failed to listen for ctrl-c");
            }
            info!("received ctrl-c");
        }
        () = terminate => {
            info!("received SIGTERM");
        }
    }

    shutdown.cancel();
}
