//! §6 operational surface: `/v1/health`, `/v1/status`, `/v1/stream`. Built
//! the way `mqk-daemon`'s router is built — a bare `Router` returned by
//! `build_router`, with CORS/tracing layers attached by `main.rs` so tests
//! can exercise the router directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::{uptime_secs, AppState, BusMsg, HealthSnapshot};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: String,
    version: String,
    uptime_secs: u64,
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.clone(),
            version: st.build.version.clone(),
            uptime_secs: uptime_secs(),
        }),
    )
}

/// The per-exchange statuses `TradingCoordinator` instances have published,
/// plus process-wide build/uptime info.
pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let exchanges = st.status.read().await.clone();
    let snapshot = HealthSnapshot {
        daemon_uptime_secs: uptime_secs(),
        exchanges: exchanges.keys().cloned().collect(),
        build: st.build.clone(),
        ts: chrono::Utc::now(),
    };
    (StatusCode::OK, Json(serde_json::json!({
        "health": snapshot,
        "exchanges": exchanges,
    })))
}

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Lifecycle(_) => "lifecycle",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None,
        }
    })
}
