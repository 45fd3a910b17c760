//! HTTP front-end: single fetch, bulk fetch and stats.
//!
//! Responses are JSON when the request `Accept` header mentions
//! `application/json` and plain text otherwise. IDs are always rendered as
//! decimal strings; they exceed the safe-integer range of JSON consumers,
//! so the JSON bodies never carry them as numbers.

use crate::app::App;
use crate::conn::Counted;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound on `n` for the bulk endpoint.
pub const MAX_BULK_SIZE: u64 = 1000;

/// Serves the HTTP API until shutdown. Accepted connections are counted
/// in the shared connection statistics.
pub async fn serve(
    listener: TcpListener,
    app: App,
    path_prefix: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "listening for http");
    let listener = CountedListener {
        inner: listener,
        app: app.clone(),
    };
    axum::serve(listener, router(app, path_prefix))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("http server shut down");
    Ok(())
}

/// Builds the router: `/{prefix}id`, `/{prefix}ids` and `/{prefix}stats`.
/// Non-GET methods are answered with 405 by the method routing.
pub fn router(app: App, path_prefix: &str) -> Router {
    Router::new()
        .route(&format!("/{path_prefix}id"), get(get_single_id))
        .route(&format!("/{path_prefix}ids"), get(get_multi_ids))
        .route(&format!("/{path_prefix}stats"), get(get_stats))
        .with_state(app)
}

async fn get_single_id(State(app): State<App>, headers: HeaderMap) -> Response {
    app.record_get_command();
    match app.next_id() {
        Ok(id) => {
            if accepts_json(&headers) {
                json_body(serde_json::json!({ "id": id.to_string() }))
            } else {
                id.to_string().into_response()
            }
        }
        Err(err) => {
            error!(error = %err, "id generation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct BulkParams {
    n: Option<String>,
}

async fn get_multi_ids(
    State(app): State<App>,
    headers: HeaderMap,
    Query(params): Query<BulkParams>,
) -> Response {
    app.record_get_command();
    let n = match params.n.as_deref() {
        None | Some("") => 1,
        Some(raw) => match raw.parse::<u64>() {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "bad n parameter");
                return StatusCode::BAD_REQUEST.into_response();
            }
        },
    };
    if n > MAX_BULK_SIZE {
        let message =
            format!("too many IDs requested: {n}, n should be smaller than {MAX_BULK_SIZE}");
        warn!("{message}");
        return (StatusCode::BAD_REQUEST, message).into_response();
    }

    let mut ids = Vec::with_capacity(n as usize);
    for _ in 0..n {
        match app.next_id() {
            Ok(id) => ids.push(id.to_string()),
            Err(err) => {
                error!(error = %err, "id generation failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    if accepts_json(&headers) {
        json_body(serde_json::json!({ "ids": ids }))
    } else {
        ids.join("\n").into_response()
    }
}

async fn get_stats(State(app): State<App>) -> Response {
    match serde_json::to_string_pretty(&app.stats()) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode stats");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

fn json_body(value: serde_json::Value) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], value.to_string()).into_response()
}

/// TCP listener that wraps every accepted stream in [`Counted`], so HTTP
/// connections show up in `curr_connections`/`total_connections`.
struct CountedListener {
    inner: TcpListener,
    app: App,
}

impl axum::serve::Listener for CountedListener {
    type Io = Counted<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => return (Counted::new(stream, self.app.clone()), addr),
                Err(err) => {
                    warn!(error = %err, "error on accept");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
