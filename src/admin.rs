use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};

use crate::aggregator::RunningAverage;
use crate::coordinator::{ReplayError, RetryCoordinator};

// ============================================================================
// Administrative HTTP Surface
// ============================================================================
//
// - GET  /stats                    running aggregate counters
// - POST /stats/reset              operator reset of the aggregator
// - POST /dlq/replay/{order_id}    re-inject a dead-lettered order
// - GET  /health                   liveness
// - GET  /metrics                  Prometheus text exposition
//
// Runs on its own thread/runtime so broker stalls never block it.
//
// ============================================================================

struct AdminState {
    aggregator: Arc<RunningAverage>,
    coordinator: Arc<RetryCoordinator>,
    registry: Arc<Registry>,
}

pub async fn start_admin_server(
    aggregator: Arc<RunningAverage>,
    coordinator: Arc<RetryCoordinator>,
    registry: Arc<Registry>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("Starting admin server on http://0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(AdminState {
                aggregator: aggregator.clone(),
                coordinator: coordinator.clone(),
                registry: registry.clone(),
            }))
            .route("/stats", web::get().to(stats_handler))
            .route("/stats/reset", web::post().to(reset_handler))
            .route("/dlq/replay/{order_id}", web::post().to(replay_handler))
            .route("/health", web::get().to(health_handler))
            .route("/metrics", web::get().to(metrics_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn stats_handler(state: web::Data<AdminState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "orderCount": state.aggregator.order_count(),
        "totalAmount": state.aggregator.total_amount(),
        "currentAverage": state.aggregator.current_average(),
    }))
}

async fn reset_handler(state: web::Data<AdminState>) -> impl Responder {
    state.aggregator.reset();
    HttpResponse::Ok().json(serde_json::json!({
        "orderCount": 0,
        "totalAmount": 0.0,
        "currentAverage": 0.0,
    }))
}

async fn replay_handler(
    state: web::Data<AdminState>,
    path: web::Path<String>,
) -> impl Responder {
    let order_id = path.into_inner();

    match state.coordinator.replay(&order_id).await {
        Ok(delivery) => HttpResponse::Ok().json(serde_json::json!({
            "orderId": order_id,
            "partition": delivery.partition,
            "offset": delivery.offset,
        })),
        Err(ReplayError::NotFound(_)) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("order {order_id} not found in the dead-letter index"),
        })),
        Err(ReplayError::Publish(e)) => {
            HttpResponse::BadGateway().json(serde_json::json!({
                "error": format!("replay publish failed: {e}"),
            }))
        }
    }
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "order-pipeline"
    }))
}

async fn metrics_handler(state: web::Data<AdminState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("encode failed: {e}"));
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

// ============================================================================
// Unit Tests
// ============================================================================
