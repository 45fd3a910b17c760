//! gRPC front-end: unary fetch RPCs and a stats service.
//!
//! Reflection and health services are registered alongside the two
//! application services so standard tooling can introspect and probe the
//! server. A panic inside a handler is caught and reported as `Internal`
//! rather than tearing down the connection task.

use crate::app::App;
use crate::proto::generator_server::{Generator, GeneratorServer};
use crate::proto::stats_server::{Stats, StatsServer};
use crate::proto::{
    FetchMultiRequest, FetchMultiResponse, FetchRequest, FetchResponse, StatsRequest,
    StatsResponse, FILE_DESCRIPTOR_SET,
};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{error, info};

/// Upper bound on `n` for `FetchMulti`.
pub const MAX_BULK_SIZE: u32 = 1000;

/// Serves the gRPC API until shutdown.
pub async fn serve(
    listener: TcpListener,
    app: App,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "listening for grpc");

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<GeneratorServer<GeneratorService>>()
        .await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(reflection)
        .add_service(GeneratorServer::new(GeneratorService { app: app.clone() }))
        .add_service(StatsServer::new(StatsService { app }))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.cancelled_owned())
        .await?;

    info!("grpc server shut down");
    Ok(())
}

/// Runs a handler body, converting a panic into `Status::internal`.
async fn catch_panic<F, T>(fut: F) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(_) => {
            error!("panic in grpc handler");
            Err(Status::internal("unexpected error"))
        }
    }
}

pub struct GeneratorService {
    app: App,
}

#[tonic::async_trait]
impl Generator for GeneratorService {
    async fn fetch(
        &self,
        _request: Request<FetchRequest>,
    ) -> Result<Response<FetchResponse>, Status> {
        let app = self.app.clone();
        catch_panic(async move {
            app.record_get_command();
            let id = app
                .next_id()
                .map_err(|err| Status::internal(err.to_string()))?;
            Ok(Response::new(FetchResponse { id }))
        })
        .await
    }

    async fn fetch_multi(
        &self,
        request: Request<FetchMultiRequest>,
    ) -> Result<Response<FetchMultiResponse>, Status> {
        let app = self.app.clone();
        let requested = request.get_ref().n;
        catch_panic(async move {
            app.record_get_command();
            if requested > MAX_BULK_SIZE {
                return Err(Status::invalid_argument(format!(
                    "too many IDs requested: {requested}, n should be smaller than {MAX_BULK_SIZE}"
                )));
            }
            let n = if requested == 0 { 1 } else { requested };
            let mut ids = Vec::with_capacity(n as usize);
            for _ in 0..n {
                ids.push(
                    app.next_id()
                        .map_err(|err| Status::internal(err.to_string()))?,
                );
            }
            Ok(Response::new(FetchMultiResponse { ids }))
        })
        .await
    }
}

pub struct StatsService {
    app: App,
}

#[tonic::async_trait]
impl Stats for StatsService {
    async fn get(
        &self,
        _request: Request<StatsRequest>,
    ) -> Result<Response<StatsResponse>, Status> {
        let app = self.app.clone();
        catch_panic(async move {
            let stats = app.stats();
            Ok(Response::new(StatsResponse {
                pid: stats.pid as i32,
                uptime: stats.uptime as i64,
                time: stats.time as i64,
                version: stats.version,
                curr_connections: stats.curr_connections as i64,
                total_connections: stats.total_connections as i64,
                cmd_get: stats.cmd_get as i64,
                get_hits: stats.get_hits as i64,
                get_misses: stats.get_misses as i64,
            }))
        })
        .await
    }
}
