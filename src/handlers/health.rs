use actix_web::{web, HttpResponse, Result};

use crate::models::ApiResponse;
use crate::state::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    match state.db.ping().await {
        Ok(()) => {
            let response = ApiResponse::success("Service is healthy");
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            log::error!("数据库不可用: {}", e);
            let response = ApiResponse::<&str>::error(format!("数据库不可用: {}", e));
            Ok(HttpResponse::ServiceUnavailable().json(response))
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}
