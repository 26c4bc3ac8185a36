use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::observer::JobLedger;

#[derive(Clone)]
pub struct DashboardState {
    pub ledger: Arc<RwLock<JobLedger>>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:job_id", get(get_job_handler))
        .route("/api/summary", get(summary_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let ledger = state.ledger.read().await;
    let jobs: Vec<_> = ledger.records().into_iter().cloned().collect();
    Json(jobs)
}

async fn get_job_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let ledger = state.ledger.read().await;
    match ledger.get(&job_id) {
        Some(record) => (StatusCode::OK, Json(record.clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Job not found: {}", job_id),
            }),
        )
            .into_response(),
    }
}

async fn summary_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.ledger.read().await.summary())
}
