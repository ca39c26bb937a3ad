#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use actix_web::{get, post, web, App, HttpResponse, HttpServer};
use serde_json::json;
use tracing::{error, info};

use crate::domain::AppState;
use crate::service::StopOutcome;

#[get("/healthz")]
pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(json!({"status":"ok"}))
}

#[get("/status")]
pub async fn status(data: web::Data<AppState>) -> HttpResponse {
    let snap = data.ctrl.snapshot();
    data.metrics.observe(&snap);
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "targets": data.ctrl.config(),
        "disk_dir": data.ctrl.disk_dir().display().to_string(),
        "occupancy": snap,
    }))
}

#[post("/stop")]
pub async fn stop(data: web::Data<AppState>) -> HttpResponse {
    info!("stop requested over http");
    let outcome = data.ctrl.stop().await;
    let code = match outcome {
        StopOutcome::Completed | StopOutcome::AlreadyStopping => actix_web::http::StatusCode::OK,
        StopOutcome::TimedOut => actix_web::http::StatusCode::ACCEPTED,
    };
    HttpResponse::build(code).json(json!({"status":"ok","outcome":outcome}))
}

#[get("/metrics")]
pub async fn scrape_metrics(data: web::Data<AppState>) -> HttpResponse {
    data.metrics.observe(&data.ctrl.snapshot());
    match data.metrics.encode_text() {
        Ok(buf) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buf),
        Err(e) => {
            error!(error=%format!("{e:#}"), "encode metrics failed");
            HttpResponse::InternalServerError().body("encode metrics failed")
        }
    }
}

pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    info!(bind, "status server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(healthz)
            .service(status)
            .service(stop)
            .service(scrape_metrics)
    })
    .workers(1)
    .disable_signals()
    .bind(bind)?
    .run()
    .await
}
