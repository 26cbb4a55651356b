use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use deployq::{schema, JobId, JobRecord, JobState};
use serde::Serialize;
use std::time::Duration;

/// How long `/health` waits for the store before reporting it degraded.
const STORE_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Acknowledges that a job was queued, not that it deployed.
///
/// `state` is the admission state at enqueue time (`active` when its server
/// was idle, `queued` otherwise). The outcome is available later from
/// `GET /jobs/{id}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAccepted {
    pub message: &'static str,
    pub job_id: JobId,
    pub state: JobState,
}

pub async fn deploy(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DeployAccepted>, ApiError> {
    let job = schema::parse(&body).map_err(|err| {
        tracing::debug!("{err}");
        err
    })?;

    let admission = state.scheduler.enqueue(job).await?;

    Ok(Json(DeployAccepted {
        message: "Deployment Added",
        job_id: admission.id(),
        state: admission.state(),
    }))
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub store: &'static str,
}

/// Liveness of the process; a lost store only degrades the report.
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let healthy = tokio::time::timeout(STORE_PING_TIMEOUT, state.scheduler.is_store_healthy())
        .await
        .unwrap_or(false);

    Json(Health {
        status: "ok",
        store: if healthy { "connected" } else { "degraded" },
    })
}

pub async fn job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let id: JobId = id.parse().map_err(|_| ApiError::NotFound)?;
    match state.scheduler.job(id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound),
    }
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
