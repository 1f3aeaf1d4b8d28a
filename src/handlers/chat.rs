//! # Chat Handlers
//!
//! The user-facing controls of the voice chat: start, stop and status. Each
//! response carries the session snapshot, so a client can render the status
//! line ("Connecting...", "Talking with Professor Spark!", ...) directly.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// POST /api/v1/chat/start
///
/// Starts a chat with the configuration current at the time of the request.
/// Returns once the realtime channel is connected; the session reports
/// `open` after the server confirms the setup.
///
/// ## Errors:
/// - 403 when the capture source is denied
/// - 502 when the connection fails or times out
/// - 409 when a chat is already running or was stopped while starting
pub async fn start_chat(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    match state.controller.start(&config).await {
        Ok(session_id) => {
            state.record_chat_start(true);
            info!(session_id = %session_id, "Chat started via API");
            Ok(HttpResponse::Ok().json(json!({
                "session_id": session_id,
                "session": state.controller.status()
            })))
        }
        Err(e) => {
            state.record_chat_start(false);
            Err(e)
        }
    }
}

/// POST /api/v1/chat/stop
///
/// Always succeeds, also when nothing is running.
pub async fn stop_chat(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.controller.stop().await;
    HttpResponse::Ok().json(json!({ "session": snapshot }))
}

/// GET /api/v1/chat/status
pub async fn chat_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "session": state.controller.status()
    }))
}
