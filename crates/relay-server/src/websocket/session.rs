//! Handshake and registration: the only place a connection is created.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tracing::{info, instrument, warn};

use super::connection::{ConnectionId, MessageSink};
use super::ingress::{IngressExit, run_ingress};
use super::transport::split_socket;
use crate::context::RelayContext;
use crate::metrics::{CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};
use crate::server::AppState;

/// GET /ws
///
/// Refuses with `503` when the registry is full, otherwise upgrades and hands
/// the socket to [`run_ws_session`]. Invalid handshakes are logged and get the
/// extractor's rejection; later upgrade failures are only logged.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(%rejection, status = %rejection.status(), "websocket upgrade failed");
            return rejection.into_response();
        }
    };
    let ctx = state.context;
    if ctx.registry.is_full().await {
        counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(capacity = ctx.registry.capacity(), "refusing websocket upgrade, registry full");
        return (StatusCode::SERVICE_UNAVAILABLE, "relay is at capacity").into_response();
    }

    ws.max_message_size(ctx.max_message_size)
        .on_failed_upgrade(|error| warn!(%error, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            let conn_id = ctx.next_connection_id();
            run_ws_session(socket, conn_id, ctx)
        })
}

/// Register an upgraded socket and run its ingress loop to completion.
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(socket: WebSocket, conn_id: ConnectionId, ctx: Arc<RelayContext>) {
    let (sink, stream) = split_socket(socket);
    let sink: Arc<dyn MessageSink> = Arc::new(sink);

    if let Err(error) = ctx.registry.add(conn_id, Arc::clone(&sink)).await {
        counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(%error, "closing upgraded socket");
        sink.close().await;
        return;
    }

    let connected_at = Instant::now();
    counter!(CONNECTIONS_TOTAL).increment(1);
    info!("client connected");

    match run_ingress(conn_id, stream, &ctx).await {
        IngressExit::Closed => info!("client disconnected"),
        IngressExit::Failed(error) => {
            warn!(%error, kind = error.kind(), "connection retired");
        }
        IngressExit::ChannelClosed => info!("broadcast channel closed, ending session"),
    }

    counter!(DISCONNECTIONS_TOTAL).increment(1);
    info!(duration_secs = connected_at.elapsed().as_secs(), "session ended");
}
