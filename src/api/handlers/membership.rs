//! Membership plan and subscription handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use crate::api::dto::{
    CreateMembershipRequest, CreateSubscriptionRequest, Envelope, LibraryQuery, MembershipDto,
    SubscriptionDto, UpdateMembershipRequest, UpdateSubscriptionRequest,
};
use crate::app_state::AppState;
use crate::domain::{Actor, LibraryId, MembershipId, SubscriptionId};
use crate::error::{AppError, ErrorResponse};

/// `POST /memberships`: Create a plan.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] unless the caller manages the
/// library, [`AppError::Validation`] for invalid terms.
#[utoipa::path(
    post,
    path = "/api/v1/memberships",
    tag = "Memberships",
    summary = "Create a membership plan",
    request_body = CreateMembershipRequest,
    responses(
        (status = 201, description = "Plan created", body = Envelope<MembershipDto>),
        (status = 401, description = "Not a library administrator", body = ErrorResponse),
        (status = 422, description = "Invalid terms", body = ErrorResponse),
    )
)]
pub async fn create_membership(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateMembershipRequest>,
) -> Result<impl IntoResponse, AppError> {
    let library_id = LibraryId::from(req.library_id);
    let membership = state
        .subscriptions
        .create_membership(&actor, library_id, req.into())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data(MembershipDto::from(membership))),
    ))
}

/// `GET /memberships`: Live plans of a library.
///
/// # Errors
///
/// Propagates repository failures.
#[utoipa::path(
    get,
    path = "/api/v1/memberships",
    tag = "Memberships",
    summary = "List membership plans",
    params(LibraryQuery),
    responses(
        (status = 200, description = "Plans", body = Envelope<Vec<MembershipDto>>),
    )
)]
pub async fn list_memberships(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let plans = state
        .subscriptions
        .list_memberships(LibraryId::from(query.library_id))
        .await?;
    let data: Vec<MembershipDto> = plans.into_iter().map(Into::into).collect();
    Ok(Json(Envelope::data(data)))
}

/// `GET /memberships/{id}`: A live plan.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] for unknown or deleted plans.
#[utoipa::path(
    get,
    path = "/api/v1/memberships/{id}",
    tag = "Memberships",
    summary = "Get a membership plan",
    params(("id" = uuid::Uuid, Path, description = "Membership UUID")),
    responses(
        (status = 200, description = "Plan", body = Envelope<MembershipDto>),
        (status = 404, description = "Unknown or deleted plan", body = ErrorResponse),
    )
)]
pub async fn get_membership(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let membership = state
        .subscriptions
        .get_membership(MembershipId::from(id))
        .await?;
    Ok(Json(Envelope::data(MembershipDto::from(membership))))
}

/// `PATCH /memberships/{id}`: Edit a plan.
///
/// Existing subscriptions keep the terms they were sold with.
///
/// # Errors
///
/// Returns [`AppError::NotFound`], [`AppError::Unauthorized`] or
/// [`AppError::Validation`].
#[utoipa::path(
    patch,
    path = "/api/v1/memberships/{id}",
    tag = "Memberships",
    summary = "Update a membership plan",
    description = "Changes apply to future purchases only.",
    params(("id" = uuid::Uuid, Path, description = "Membership UUID")),
    request_body = UpdateMembershipRequest,
    responses(
        (status = 200, description = "Plan updated", body = Envelope<MembershipDto>),
        (status = 401, description = "Not a library administrator", body = ErrorResponse),
        (status = 404, description = "Unknown or deleted plan", body = ErrorResponse),
    )
)]
pub async fn update_membership(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<UpdateMembershipRequest>,
) -> Result<impl IntoResponse, AppError> {
    let membership = state
        .subscriptions
        .update_membership(&actor, MembershipId::from(id), req.into())
        .await?;
    Ok(Json(Envelope::data(MembershipDto::from(membership))))
}

/// `DELETE /memberships/{id}`: Soft-delete a plan.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] or [`AppError::Unauthorized`].
#[utoipa::path(
    delete,
    path = "/api/v1/memberships/{id}",
    tag = "Memberships",
    summary = "Delete a membership plan",
    params(("id" = uuid::Uuid, Path, description = "Membership UUID")),
    responses(
        (status = 204, description = "Plan deleted"),
        (status = 401, description = "Not a library administrator", body = ErrorResponse),
        (status = 404, description = "Unknown or deleted plan", body = ErrorResponse),
    )
)]
pub async fn delete_membership(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .subscriptions
        .delete_membership(&actor, MembershipId::from(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /subscriptions`: Sell a plan to a user.
///
/// # Errors
///
/// Returns `membership_deleted` for a soft-deleted plan.
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions",
    tag = "Memberships",
    summary = "Purchase a subscription",
    description = "Snapshots the plan's current terms onto the subscription.",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = Envelope<SubscriptionDto>),
        (status = 400, description = "Plan deleted", body = ErrorResponse),
        (status = 401, description = "Not a library administrator", body = ErrorResponse),
        (status = 404, description = "User or plan not found", body = ErrorResponse),
    )
)]
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state
        .subscriptions
        .purchase(&actor, req.user_id.into(), req.membership_id.into())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data(SubscriptionDto::from(subscription))),
    ))
}

/// `GET /subscriptions/{id}`: A subscription.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] or [`AppError::Unauthorized`].
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/{id}",
    tag = "Memberships",
    summary = "Get a subscription",
    params(("id" = uuid::Uuid, Path, description = "Subscription UUID")),
    responses(
        (status = 200, description = "Subscription", body = Envelope<SubscriptionDto>),
        (status = 401, description = "Not visible to the caller", body = ErrorResponse),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
    )
)]
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state
        .subscriptions
        .get_subscription(&actor, SubscriptionId::from(id))
        .await?;
    Ok(Json(Envelope::data(SubscriptionDto::from(subscription))))
}

/// `PATCH /subscriptions/{id}`: Override snapshot terms.
///
/// # Errors
///
/// Returns [`AppError::NotFound`], [`AppError::Unauthorized`] or
/// [`AppError::Validation`].
#[utoipa::path(
    patch,
    path = "/api/v1/subscriptions/{id}",
    tag = "Memberships",
    summary = "Update a subscription",
    params(("id" = uuid::Uuid, Path, description = "Subscription UUID")),
    request_body = UpdateSubscriptionRequest,
    responses(
        (status = 200, description = "Subscription updated", body = Envelope<SubscriptionDto>),
        (status = 401, description = "Not a library administrator", body = ErrorResponse),
        (status = 404, description = "Subscription not found", body = ErrorResponse),
    )
)]
pub async fn update_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state
        .subscriptions
        .update_subscription(&actor, SubscriptionId::from(id), req.into())
        .await?;
    Ok(Json(Envelope::data(SubscriptionDto::from(subscription))))
}

/// Membership routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/memberships",
            post(create_membership).get(list_memberships),
        )
        .route(
            "/memberships/{id}",
            get(get_membership)
                .patch(update_membership)
                .delete(delete_membership),
        )
        .route("/subscriptions", post(create_subscription))
        .route(
            "/subscriptions/{id}",
            get(get_subscription).patch(update_subscription),
        )
}
