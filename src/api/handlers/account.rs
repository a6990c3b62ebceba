//! Registration, profile, library and staff handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use crate::api::dto::{
    CreateLibraryRequest, CreateStaffRequest, Envelope, LibraryDto, RegisterRequest, StaffDto,
    UserDto,
};
use crate::app_state::AppState;
use crate::domain::{Actor, LibraryId};
use crate::error::{AppError, ErrorResponse};

/// `POST /auth/register`: Create an account.
///
/// # Errors
///
/// Returns [`AppError::Validation`] for bad input or a taken email.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "Auth",
    summary = "Register an account",
    description = "Creates an identity-provider credential and a linked USER account.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = Envelope<UserDto>),
        (status = 422, description = "Invalid input", body = ErrorResponse),
    ),
    security(())
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.accounts.register(req.into()).await?;
    Ok((StatusCode::CREATED, Json(Envelope::data(UserDto::from(user)))))
}

/// `GET /auth/me`: The caller's account.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] if the account was removed.
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "Auth",
    summary = "Current account",
    responses(
        (status = 200, description = "Caller's account", body = Envelope<UserDto>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    )
)]
pub async fn me(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.accounts.me(&actor).await?;
    Ok(Json(Envelope::data(UserDto::from(user))))
}

/// `POST /libraries`: Create a tenant library.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] unless the caller is a global admin.
#[utoipa::path(
    post,
    path = "/api/v1/libraries",
    tag = "Libraries",
    summary = "Create a library",
    request_body = CreateLibraryRequest,
    responses(
        (status = 201, description = "Library created", body = Envelope<LibraryDto>),
        (status = 401, description = "Not a global admin", body = ErrorResponse),
        (status = 422, description = "Invalid input", body = ErrorResponse),
    )
)]
pub async fn create_library(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateLibraryRequest>,
) -> Result<impl IntoResponse, AppError> {
    let library = state.accounts.create_library(&actor, req.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data(LibraryDto::from(library))),
    ))
}

/// `GET /libraries/{id}`: Library details.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] for unknown libraries.
#[utoipa::path(
    get,
    path = "/api/v1/libraries/{id}",
    tag = "Libraries",
    summary = "Get a library",
    params(("id" = uuid::Uuid, Path, description = "Library UUID")),
    responses(
        (status = 200, description = "Library", body = Envelope<LibraryDto>),
        (status = 404, description = "Library not found", body = ErrorResponse),
    )
)]
pub async fn get_library(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let library = state.accounts.get_library(LibraryId::from(id)).await?;
    Ok(Json(Envelope::data(LibraryDto::from(library))))
}

/// `POST /staffs`: Appoint a user to a library.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] unless the caller manages the
/// library.
#[utoipa::path(
    post,
    path = "/api/v1/staffs",
    tag = "Libraries",
    summary = "Add a staff member",
    request_body = CreateStaffRequest,
    responses(
        (status = 201, description = "Staff added", body = Envelope<StaffDto>),
        (status = 401, description = "Not a library administrator", body = ErrorResponse),
        (status = 404, description = "User or library not found", body = ErrorResponse),
    )
)]
pub async fn create_staff(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateStaffRequest>,
) -> Result<impl IntoResponse, AppError> {
    let staff = state
        .accounts
        .add_staff(&actor, req.library_id.into(), req.user_id.into(), req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope::data(StaffDto::from(staff)))))
}

/// Routes reachable without credentials.
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/auth/register", post(register))
}

/// Authenticated account routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(me))
        .route("/libraries", post(create_library))
        .route("/libraries/{id}", get(get_library))
        .route("/staffs", post(create_staff))
}
