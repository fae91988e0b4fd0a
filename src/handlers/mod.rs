pub mod health;
pub mod jobs;
pub mod records;
pub mod wencai;

use actix_web::web;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(health::config)
            .configure(wencai::config)
            .configure(jobs::config)
            .configure(records::config)
    );
}
