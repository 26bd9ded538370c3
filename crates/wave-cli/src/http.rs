use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use wave_engine::WavePlayer;
use wave_proto::protocol::PlayerSnapshot;

#[derive(Clone)]
struct HttpState {
    player: Arc<WavePlayer>,
}

#[derive(Deserialize)]
struct SourceBody {
    src: String,
}

pub fn router(player: Arc<WavePlayer>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/stop", post(stop))
        .route("/api/toggle", post(toggle))
        .route("/api/seek/:secs", post(seek))
        .route("/api/rate/:rate", post(set_rate))
        .route("/api/source", post(set_source))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { player })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    player: Arc<WavePlayer>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, router(player)).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.player.snapshot())
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: play");
    state.player.play();
    StatusCode::OK
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: pause");
    state.player.pause();
    StatusCode::OK
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: stop");
    state.player.stop();
    StatusCode::OK
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: toggle");
    state.player.toggle();
    StatusCode::OK
}

async fn seek(State(state): State<HttpState>, Path(secs): Path<f64>) -> StatusCode {
    info!("HTTP API: seek to {}", secs);
    state.player.seek(secs);
    StatusCode::OK
}

async fn set_rate(State(state): State<HttpState>, Path(rate): Path<f64>) -> StatusCode {
    match state.player.set_rate(rate) {
        Ok(()) => {
            info!("HTTP API: rate {}", rate);
            StatusCode::OK
        }
        Err(e) => {
            warn!("HTTP API: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

async fn set_source(State(state): State<HttpState>, Json(body): Json<SourceBody>) -> StatusCode {
    if body.src.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    info!("HTTP API: source {}", body.src);
    state.player.set_source(body.src.trim());
    StatusCode::OK
}
