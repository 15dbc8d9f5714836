//! JSON HTTP surface over the adwatch service.

use std::sync::Arc;

use adwatch_core::FetchJob;
use adwatch_storage::AdFilter;
use adwatch_sync::{AdwatchService, OrchestratorError, ServiceError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "adwatch-web";

#[derive(Clone)]
pub struct AppState {
    pub service: AdwatchService,
}

impl AppState {
    pub fn new(service: AdwatchService) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize, Default)]
struct JobsQuery {
    limit: Option<usize>,
}

/// A fetch job plus its human-readable status line.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub summary: String,
    #[serde(flatten)]
    pub job: FetchJob,
}

impl From<FetchJob> for JobView {
    fn from(job: FetchJob) -> Self {
        Self {
            summary: job.summary(),
            job,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/competitors", get(competitors_handler))
        .route("/competitors/{id}/fetch", post(fetch_handler))
        .route("/competitors/{id}/metrics", get(metrics_handler))
        .route("/competitors/{id}/ads", get(ads_handler))
        .route("/competitors/{id}/fetch-jobs", get(jobs_handler))
        .route("/fetch-jobs/{id}", get(job_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(service: AdwatchService, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "adwatch api listening");
    axum::serve(listener, app(AppState::new(service)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

async fn competitors_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.competitors().await {
        Ok(competitors) => Json(competitors).into_response(),
        Err(err) => api_error(err.into()),
    }
}

async fn fetch_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.service.run_fetch(id).await {
        Ok(job) => Json(JobView::from(job)).into_response(),
        Err(err) => api_error(ApiError::from(err)),
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.service.get_metrics(id).await {
        Ok(bundle) => Json(bundle).into_response(),
        Err(err) => api_error(err.into()),
    }
}

async fn ads_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(filter): Query<AdFilter>,
) -> Response {
    match state.service.list_ads(id, &filter).await {
        Ok(ads) => Json(ads).into_response(),
        Err(err) => api_error(err.into()),
    }
}

async fn jobs_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<JobsQuery>,
) -> Response {
    match state.service.fetch_jobs(id, query.limit).await {
        Ok(jobs) => Json(jobs.into_iter().map(JobView::from).collect::<Vec<_>>()).into_response(),
        Err(err) => api_error(err.into()),
    }
}

async fn job_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.service.fetch_job(id).await {
        Ok(job) => Json(JobView::from(job)).into_response(),
        Err(err) => api_error(err.into()),
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let (status, code) = match &err {
            OrchestratorError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "already_running"),
            OrchestratorError::CompetitorNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OrchestratorError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence")
            }
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Orchestrator(inner) => inner.into(),
            ServiceError::CompetitorNotFound(_) | ServiceError::JobNotFound(_) => Self {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: err.to_string(),
            },
            ServiceError::Store(_) | ServiceError::Ledger(_) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "backend",
                message: err.to_string(),
            },
        }
    }
}

fn api_error(err: ApiError) -> Response {
    if err.status.is_server_error() {
        error!(code = err.code, error = %err.message, "request failed");
    }
    (
        err.status,
        Json(json!({"error": err.code, "message": err.message})),
    )
        .into_response()
}
