//! Axum-based WebSocket and HTTP server.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vidlisync_core::error::SyncError;
use vidlisync_core::types::VoiceProfile;
use vidlisync_pipeline::{HealthStatus, ProcessRequest};

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;
use crate::sweep::spawn_idle_sweep;

/// Start the gateway server and the idle sweep. Returns on shutdown signal.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state
        .config
        .gateway()
        .bind
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let app = router(state.clone());

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    let sweep = spawn_idle_sweep(state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweep.abort();
    served?;

    Ok(())
}

/// Build the router with all routes and middleware.
pub fn router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/connections", get(connections_handler))
        .route("/api/translate", post(translate_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics/prometheus", get(prometheus_handler));

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
    .with_state(state)
}

/// Hard cap enforced by the WebSocket codec. Frames above the configured
/// `max_message_bytes` but below this cap reach the connection loop and are
/// answered with an error frame instead of closing the socket.
const TRANSPORT_LIMIT: usize = 64 * 1024 * 1024;

fn transport_limit(max_message_bytes: usize) -> usize {
    max_message_bytes.max(TRANSPORT_LIMIT)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let limit = transport_limit(state.config.gateway().max_message_bytes);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let connections = state.connections.read().await.len();
    let pipeline = state.pipeline.health().await;

    let status = match pipeline.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };

    (
        status,
        Json(json!({
            "status": pipeline.status,
            "version": version,
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "connections": connections,
            "active_sessions": state.sessions.active_count(),
            "rooms": state.rooms.room_count(),
            "pipeline": pipeline,
        })),
    )
}

async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.pipeline.metrics())
}

async fn connections_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let connections = state.connection_stats().await;
    Json(json!({
        "total": connections.len(),
        "connections": connections,
    }))
}

#[cfg(feature = "metrics")]
async fn prometheus_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "Prometheus recorder not installed").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TranslateRequest {
    audio_data: String,
    target_language: String,
    #[serde(default)]
    source_language: Option<String>,
    #[serde(default)]
    voice_profile: Option<VoiceProfile>,
    #[serde(default)]
    include_lip_sync: bool,
    #[serde(default)]
    face_image: Option<String>,
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, SyncError> {
    STANDARD
        .decode(value)
        .map_err(|e| SyncError::Malformed(format!("Invalid base64 in {field}: {e}")))
}

async fn translate_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<TranslateRequest>,
) -> Response {
    let audio = match decode_field(&req.audio_data, "audio_data") {
        Ok(audio) => audio,
        Err(e) => return error_response(&e),
    };
    let face_image = match req.face_image.as_deref().map(|f| decode_field(f, "face_image")) {
        Some(Ok(face)) => Some(face),
        Some(Err(e)) => return error_response(&e),
        None => None,
    };

    let request = ProcessRequest {
        audio,
        target_language: req.target_language,
        voice_profile: req.voice_profile.unwrap_or_default(),
        source_language: req.source_language.filter(|s| !s.trim().is_empty()),
        include_lip_sync: req.include_lip_sync,
        face_image,
    };

    match state.pipeline.process(request).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            warn!(code = e.code(), error = %e, "Translate request rejected");
            error_response(&e)
        }
    }
}

/// Map a gateway error onto an HTTP status with the standard error body.
fn error_response(err: &SyncError) -> Response {
    let status = match err {
        SyncError::Malformed(_) => StatusCode::BAD_REQUEST,
        SyncError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::NotReady(_) | SyncError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "success": false,
            "code": err.code(),
            "error": err.to_string(),
        })),
    )
        .into_response()
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(%e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    }
}
