use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// GET /api/v1/config
///
/// The effective configuration. The API key is reported only as
/// `api_key_configured`.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config.redacted_json()
    })))
}

/// PUT /api/v1/config
///
/// Partial update, e.g. `{"live": {"voice": "Puck"}}`. The new values are
/// validated as a whole and apply to the next chat; a running chat keeps
/// the configuration it was started with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(updated.clone())
        .map_err(AppError::ValidationError)?;
    info!(
        voice = %updated.live.voice,
        capture_source = %updated.capture.source,
        "Configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated, applies to the next chat",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": updated.redacted_json()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    macro_rules! config_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .route("/config", web::get().to(get_config))
                    .route("/config", web::put().to(update_config)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_get_config_hides_api_key() {
        let mut config = AppConfig::default();
        config.live.api_key = "super-secret".to_string();
        let state = AppState::new(config);
        let app = config_app!(state);

        let req = test::TestRequest::get().uri("/config").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("super-secret"));

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["config"]["live"]["api_key_configured"], true);
        assert_eq!(json["config"]["live"]["voice"], "Charon");
    }

    #[actix_web::test]
    async fn test_partial_update_applies() {
        let state = AppState::new(AppConfig::default());
        let app = config_app!(state);

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"live": {"voice": "Puck"}, "capture": {"realtime": false}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let config = state.get_config();
        assert_eq!(config.live.voice, "Puck");
        assert!(!config.capture.realtime);
        assert_eq!(config.live.persona_name, "Professor Spark");
    }

    #[actix_web::test]
    async fn test_invalid_update_is_rejected_and_not_applied() {
        let state = AppState::new(AppConfig::default());
        let app = config_app!(state);

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"audio": {"chunk_size": 0}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");

        assert_eq!(state.get_config().audio.chunk_size, 4096);
    }
}
