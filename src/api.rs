//! HTTP facade.
//!
//! - `POST /send`     - send a text message and log it
//! - `GET /qr/text`   - current login code as JSON
//! - `GET /qr/photo`  - current login code as a PNG
//! - `GET /csv`       - every row of the message log
//! - `GET /health`    - uptime and session phase

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::bootstrap::SessionPhase;
use crate::client::{ChatClient, Jid};
use crate::error::BridgeError;
use crate::message_log::{LogRecord, MessageLog};
use crate::qr::{self, LoginCodeFile, PHOTO_SIZE};

/// State shared by every handler.
pub struct AppState {
    pub start_time: Instant,
    pub client: Arc<dyn ChatClient>,
    pub log: Arc<MessageLog>,
    pub code_file: LoginCodeFile,
    pub send_timeout: Duration,
    pub phase: watch::Receiver<SessionPhase>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/send", post(send_message))
        .route("/qr/text", get(qr_text))
        .route("/qr/photo", get(qr_photo))
        .route("/csv", get(csv_contents))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Outbound send failed or timed out; detail goes to the caller
    Send(BridgeError),
    QrUnavailable(BridgeError),
    LogUnavailable(BridgeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Send(e) => {
                error!("Failed to send message: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::QrUnavailable(e) => {
                error!("Failed to produce QR code: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate QR code".to_string())
            }
            ApiError::LogUnavailable(e) => {
                error!("Failed to read message log: {}", e);
                let message = match e {
                    BridgeError::Io(_) => "Failed to open CSV file",
                    _ => "Failed to read CSV file",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    session: SessionPhase,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        session: *state.phase.borrow(),
    })
}

// ============================================================================
// Send
// ============================================================================

#[derive(Debug, Deserialize)]
struct SendRequest {
    #[serde(alias = "target")]
    jid: String,
    text: String,
}

#[derive(Serialize)]
struct SendResponse {
    status: &'static str,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.jid.trim().is_empty() {
        return Err(ApiError::BadRequest("jid is required".to_string()));
    }
    if req.text.is_empty() {
        return Err(ApiError::BadRequest("text is required".to_string()));
    }

    let target = Jid::parse_target(&req.jid);
    info!("Sending message to {}", target);

    let sent = tokio::time::timeout(state.send_timeout, state.client.send_text(&target, &req.text))
        .await
        .map_err(|_| ApiError::Send(BridgeError::SendTimeout(state.send_timeout)))?
        .map_err(ApiError::Send)?;
    info!("Message sent, ID: {}", sent);

    // The message is already out; a log failure must not turn this into an error
    if let Err(e) = state.log.append(&LogRecord::outbound(req.text, Utc::now())) {
        error!("Failed to log sent message {}: {}", sent, e);
    }

    Ok(Json(SendResponse { status: "Message sent" }))
}

// ============================================================================
// Login code
// ============================================================================

#[derive(Serialize)]
struct QrTextResponse {
    qr_code: String,
}

async fn qr_text(State(state): State<Arc<AppState>>) -> Result<Json<QrTextResponse>, ApiError> {
    let qr_code = state.code_file.read().await.map_err(ApiError::QrUnavailable)?;
    Ok(Json(QrTextResponse { qr_code }))
}

async fn qr_photo(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let code = state.code_file.read().await.map_err(ApiError::QrUnavailable)?;
    let png = qr::render_png(&code, PHOTO_SIZE).map_err(ApiError::QrUnavailable)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

// ============================================================================
// Message log
// ============================================================================

#[derive(Serialize)]
struct CsvResponse {
    data: Vec<Vec<String>>,
}

async fn csv_contents(State(state): State<Arc<AppState>>) -> Result<Json<CsvResponse>, ApiError> {
    let data = state.log.read_all().map_err(ApiError::LogUnavailable)?;
    Ok(Json(CsvResponse { data }))
}
