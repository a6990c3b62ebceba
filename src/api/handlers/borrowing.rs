//! Loan lifecycle and export handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;

use crate::api::dto::{
    BorrowingDetailDto, BorrowingDto, BorrowingListItemDto, BorrowingQuery,
    CreateBorrowingRequest, Envelope, ExportRequest, JobDto, LostBorrowingRequest, Meta,
    ReturnBorrowingRequest,
};
use crate::app_state::AppState;
use crate::domain::{Actor, BorrowingId, JobType};
use crate::error::{AppError, ErrorResponse};
use crate::ports::Page;
use crate::service::export::ExportPayload;

/// `POST /borrowings`: Lend a book.
///
/// # Errors
///
/// Returns the admission invariant that failed, e.g.
/// `book_already_borrowed` or `active_loan_limit_reached`.
#[utoipa::path(
    post,
    path = "/api/v1/borrowings",
    tag = "Borrowings",
    summary = "Borrow a book",
    description = "Admits a loan against the subscription's grandfathered terms. The due date defaults to `borrowed_at + loan_period` days.",
    request_body = CreateBorrowingRequest,
    responses(
        (status = 201, description = "Loan created", body = Envelope<BorrowingDto>),
        (status = 400, description = "Admission invariant violated", body = ErrorResponse),
        (status = 401, description = "Not staff of the book's library", body = ErrorResponse),
        (status = 404, description = "Book or subscription not found", body = ErrorResponse),
    )
)]
pub async fn create_borrowing(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateBorrowingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let borrowing = state.loans.borrow(&actor, req.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data(BorrowingDto::at(borrowing, Utc::now()))),
    ))
}

/// `GET /borrowings`: Filtered, paged loans.
///
/// Callers outside the filtered library only ever see their own loans.
///
/// # Errors
///
/// Propagates repository failures.
#[utoipa::path(
    get,
    path = "/api/v1/borrowings",
    tag = "Borrowings",
    summary = "List borrowings",
    description = "Status flags are OR-ed together; no flag means every status. Newest first.",
    params(BorrowingQuery),
    responses(
        (status = 200, description = "Loans", body = Envelope<Vec<BorrowingListItemDto>>),
    )
)]
pub async fn list_borrowings(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<BorrowingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let default = Page::default();
    let page = Page::new(
        query.skip.unwrap_or(default.skip),
        query.limit.unwrap_or(default.limit),
    );
    let listing = state.loans.list(&actor, query.filter(), page).await?;
    let now = Utc::now();
    let data: Vec<BorrowingListItemDto> = listing
        .items
        .into_iter()
        .map(|view| BorrowingListItemDto::at(view, now))
        .collect();
    Ok(Json(Envelope::page(data, Meta::new(listing.total, page))))
}

/// `GET /borrowings/{id}`: A loan with its library and borrower.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] or [`AppError::Unauthorized`].
#[utoipa::path(
    get,
    path = "/api/v1/borrowings/{id}",
    tag = "Borrowings",
    summary = "Get a borrowing",
    params(("id" = uuid::Uuid, Path, description = "Borrowing UUID")),
    responses(
        (status = 200, description = "Loan", body = Envelope<BorrowingDetailDto>),
        (status = 401, description = "Not visible to the caller", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
    )
)]
pub async fn get_borrowing(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = state.loans.get(&actor, BorrowingId::from(id)).await?;
    Ok(Json(Envelope::data(BorrowingDetailDto::at(ctx, Utc::now()))))
}

/// `POST /borrowings/{id}/return`: Close a loan as returned.
///
/// # Errors
///
/// Returns `borrowing_already_returned`, `borrowing_already_lost` or
/// `return_before_borrow`.
#[utoipa::path(
    post,
    path = "/api/v1/borrowings/{id}/return",
    tag = "Borrowings",
    summary = "Return a book",
    description = "Without an explicit `fine`, overdue days are charged at the subscription's `fine_per_day`.",
    params(("id" = uuid::Uuid, Path, description = "Borrowing UUID")),
    request_body = ReturnBorrowingRequest,
    responses(
        (status = 200, description = "Loan returned", body = Envelope<BorrowingDto>),
        (status = 400, description = "Loan already resolved", body = ErrorResponse),
        (status = 401, description = "Not staff of the library", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
    )
)]
pub async fn return_borrowing(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<ReturnBorrowingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let borrowing = state
        .loans
        .return_borrowing(&actor, BorrowingId::from(id), req.into())
        .await?;
    Ok(Json(Envelope::data(BorrowingDto::at(borrowing, Utc::now()))))
}

/// `POST /borrowings/{id}/lost`: Close a loan as lost.
///
/// # Errors
///
/// Returns `borrowing_already_returned` or `borrowing_already_lost`.
#[utoipa::path(
    post,
    path = "/api/v1/borrowings/{id}/lost",
    tag = "Borrowings",
    summary = "Report a book lost",
    params(("id" = uuid::Uuid, Path, description = "Borrowing UUID")),
    request_body = LostBorrowingRequest,
    responses(
        (status = 200, description = "Loan marked lost", body = Envelope<BorrowingDto>),
        (status = 400, description = "Loan already resolved", body = ErrorResponse),
        (status = 401, description = "Not staff of the library", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
    )
)]
pub async fn report_lost(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<LostBorrowingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let borrowing = state
        .loans
        .report_lost(&actor, BorrowingId::from(id), req.into())
        .await?;
    Ok(Json(Envelope::data(BorrowingDto::at(borrowing, Utc::now()))))
}

/// `POST /borrowings/export`: Queue a CSV export.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] without a staff position in the
/// library.
#[utoipa::path(
    post,
    path = "/api/v1/borrowings/export",
    tag = "Borrowings",
    summary = "Export borrowings",
    description = "Submits a background job. Poll `GET /jobs/{id}` and fetch the file from `GET /jobs/{id}/download`.",
    request_body = ExportRequest,
    responses(
        (status = 201, description = "Export job submitted", body = Envelope<JobDto>),
        (status = 401, description = "Not staff of the library", body = ErrorResponse),
    )
)]
pub async fn export_borrowings(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<ExportRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payload = ExportPayload::from(req);
    let job = state
        .jobs
        .submit(&actor, payload.library_id, JobType::ExportBorrowings, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope::data(JobDto::from(job)))))
}

/// Borrowing routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/borrowings", post(create_borrowing).get(list_borrowings))
        .route("/borrowings/export", post(export_borrowings))
        .route("/borrowings/{id}", get(get_borrowing))
        .route("/borrowings/{id}/return", post(return_borrowing))
        .route("/borrowings/{id}/lost", post(report_lost))
}
