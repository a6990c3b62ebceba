//! Background job handlers.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::api::dto::{DownloadDto, Envelope, JobDto};
use crate::app_state::AppState;
use crate::domain::{Actor, JobId};
use crate::error::{AppError, ErrorResponse};
use crate::service::job_service::DOWNLOAD_URL_TTL;

/// `GET /jobs/{id}`: Job status and result.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] or [`AppError::Unauthorized`].
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    tag = "Jobs",
    summary = "Get a job",
    params(("id" = uuid::Uuid, Path, description = "Job UUID")),
    responses(
        (status = 200, description = "Job", body = Envelope<JobDto>),
        (status = 401, description = "Not staff of the job's library", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse),
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let job = state.jobs.get(&actor, JobId::from(id)).await?;
    Ok(Json(Envelope::data(JobDto::from(job))))
}

/// `GET /jobs/{id}/download`: Short-lived URL of an export's file.
///
/// # Errors
///
/// Returns [`AppError::Validation`] unless the job is a completed export.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/download",
    tag = "Jobs",
    summary = "Download an export",
    params(("id" = uuid::Uuid, Path, description = "Job UUID")),
    responses(
        (status = 200, description = "Presigned URL", body = Envelope<DownloadDto>),
        (status = 401, description = "Not staff of the job's library", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse),
        (status = 422, description = "Not a completed export", body = ErrorResponse),
    )
)]
pub async fn download(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let url = state.jobs.download_url(&actor, JobId::from(id)).await?;
    Ok(Json(Envelope::data(DownloadDto {
        url,
        expires_in: DOWNLOAD_URL_TTL.as_secs(),
    })))
}

/// Job routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/download", get(download))
}
