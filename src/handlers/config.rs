use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration after defaults, `config.toml` and environment overrides.
///
/// ## Endpoint: `GET /api/v1/config`
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = serde_json::to_value(state.config())?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_get_config_exposes_sections() {
        let mut config = AppConfig::default();
        config.server.port = 9123;
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config)))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["server"]["port"], 9123);
        assert_eq!(body["config"]["streaming"]["overlap_ms"], 20);
        assert_eq!(body["config"]["noise"]["default_type"], "cafe");
        assert_eq!(body["config"]["models"]["device"], "auto");
    }
}
