use actix_web::{web, HttpResponse, Result};

use crate::error::JobError;
use crate::models::ApiResponse;
use crate::services::jobs::JobReport;
use crate::services::scheduler::JobStatus;
use crate::state::AppState;

/// 所有任务的调度状态
pub async fn list_jobs(state: web::Data<AppState>) -> Result<HttpResponse> {
    let statuses = state.scheduler.statuses().await;
    Ok(HttpResponse::Ok().json(ApiResponse::<Vec<JobStatus>>::success(statuses)))
}

/// 手动触发一次任务，等待执行完成
pub async fn run_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let name = path.into_inner();

    match state.scheduler.trigger(&name).await {
        Ok(report) => Ok(HttpResponse::Ok().json(ApiResponse::success(report))),
        Err(e) => {
            let response = ApiResponse::<JobReport>::error(e.to_string());
            Ok(match e {
                JobError::NotFound(_) => HttpResponse::NotFound().json(response),
                JobError::Busy(_) => HttpResponse::Conflict().json(response),
                JobError::Failed(_) => HttpResponse::InternalServerError().json(response),
            })
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/jobs")
            .route("", web::get().to(list_jobs))
            .route("/{name}/run", web::post().to(run_job)),
    );
}
