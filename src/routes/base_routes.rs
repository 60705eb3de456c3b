use actix_web::{get, web, HttpResponse, Responder};
use chrono::Utc;

use crate::AppState;

#[get("/")]
pub async fn root() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Work order label service is running"
    }))
}

#[get("/api/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelConfig;
    use crate::printnode::MockPrintService;
    use crate::symbols::SymbolEncoder;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_ok() {
        let state = AppState::with_service(
            Arc::new(MockPrintService::new()),
            "Print System",
            LabelConfig::default(),
            SymbolEncoder::new(),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(root)
                .service(health),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "OK");
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
        assert!(body["timestamp"].is_string());

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
