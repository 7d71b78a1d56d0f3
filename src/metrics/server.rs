use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use uuid::Uuid;

use crate::outbox::OutboxStore;

const FAILED_PAGE_SIZE: usize = 100;

/// Start the operational HTTP server: Prometheus scrape endpoint, health
/// check, and the admin surface for failed outbox records.
/// Runs on its own runtime in a dedicated thread so a wedged dispatcher
/// cannot take the scrape endpoint down with it.
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    store: Arc<dyn OutboxStore>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(store.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
            .route("/outbox/failed", web::get().to(failed_handler))
            .route("/outbox/failed/{id}/retry", web::post().to(retry_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("encode error: {}", e));
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "outbox-relay"
    }))
}

/// Records that exhausted their retry budget, oldest first.
async fn failed_handler(store: web::Data<Arc<dyn OutboxStore>>) -> impl Responder {
    match store.failed(FAILED_PAGE_SIZE).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            tracing::error!(error = %e, "listing failed outbox records");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

/// Requeue a failed record with a fresh attempt budget.
async fn retry_handler(
    store: web::Data<Arc<dyn OutboxStore>>,
    id: web::Path<Uuid>,
) -> impl Responder {
    let id = id.into_inner();
    match store.retry_failed(id).await {
        Ok(true) => {
            tracing::info!(record_id = %id, "failed record requeued for delivery");
            HttpResponse::Ok().json(serde_json::json!({
                "status": "requeued",
                "id": id
            }))
        }
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "no failed record with that id",
            "id": id
        })),
        Err(e) => {
            tracing::error!(error = %e, record_id = %id, "requeueing failed outbox record");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}
