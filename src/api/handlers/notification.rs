//! Inbox, live stream and push token handlers.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::api::dto::{
    Envelope, Meta, NotificationDto, PageParams, PushTokenDto, RegisterPushTokenRequest,
    UpdatedCount,
};
use crate::app_state::AppState;
use crate::domain::{Actor, NotificationId};
use crate::error::{AppError, ErrorResponse};

/// `GET /notifications`: The caller's inbox, newest first.
///
/// # Errors
///
/// Propagates repository failures.
#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    tag = "Notifications",
    summary = "List notifications",
    description = "`meta.unread` carries the caller's unread count.",
    params(PageParams),
    responses(
        (status = 200, description = "Inbox page", body = Envelope<Vec<NotificationDto>>),
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page();
    let listing = state.notifications.list(&actor, page).await?;
    let meta = Meta {
        unread: Some(listing.unread),
        ..Meta::new(listing.total, page)
    };
    let data: Vec<NotificationDto> = listing.items.into_iter().map(Into::into).collect();
    Ok(Json(Envelope::page(data, meta)))
}

/// `GET /notifications/stream`: Live notifications as server-sent events.
///
/// Each event carries one notification as JSON. The subscription is
/// released when the client disconnects.
#[utoipa::path(
    get,
    path = "/api/v1/notifications/stream",
    tag = "Notifications",
    summary = "Stream notifications",
    description = "Server-sent events; one `notification` event per new notification of the caller.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = NotificationDto),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
    )
)]
pub async fn stream_notifications(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cancel = CancellationToken::new();
    let mut rx = state.notifications.stream(&actor, cancel.clone());
    let guard = cancel.drop_guard();
    let user_id = actor.user_id;
    tracing::debug!(%user_id, "notification stream opened");

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(notification) = rx.recv().await {
            let dto = NotificationDto::from(notification);
            match Event::default().event("notification").json_data(&dto) {
                Ok(event) => yield Ok(event),
                Err(e) => tracing::warn!(%user_id, error = %e, "dropping unserializable notification"),
            }
        }
        tracing::debug!(%user_id, "notification stream closed");
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `POST /notifications/read`: Mark the whole inbox read.
///
/// # Errors
///
/// Propagates repository failures.
#[utoipa::path(
    post,
    path = "/api/v1/notifications/read",
    tag = "Notifications",
    summary = "Mark all notifications read",
    responses(
        (status = 200, description = "Number of notifications marked", body = Envelope<UpdatedCount>),
    )
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let updated = state.notifications.mark_all_read(&actor).await?;
    Ok(Json(Envelope::data(UpdatedCount { updated })))
}

/// `POST /notifications/{id}/read`: Mark one notification read.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] for notifications of other users.
#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/read",
    tag = "Notifications",
    summary = "Mark a notification read",
    params(("id" = uuid::Uuid, Path, description = "Notification UUID")),
    responses(
        (status = 200, description = "Notification", body = Envelope<NotificationDto>),
        (status = 404, description = "Not the caller's notification", body = ErrorResponse),
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let notification = state
        .notifications
        .mark_read(&actor, NotificationId::from(id))
        .await?;
    Ok(Json(Envelope::data(NotificationDto::from(notification))))
}

/// `POST /notifications/push-tokens`: Register a device token.
///
/// # Errors
///
/// Returns [`AppError::Validation`] for an empty token.
#[utoipa::path(
    post,
    path = "/api/v1/notifications/push-tokens",
    tag = "Notifications",
    summary = "Register a push token",
    request_body = RegisterPushTokenRequest,
    responses(
        (status = 201, description = "Token registered", body = Envelope<PushTokenDto>),
        (status = 422, description = "Empty token", body = ErrorResponse),
    )
)]
pub async fn register_push_token(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<RegisterPushTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = state
        .notifications
        .register_push_token(&actor, &req.token, req.provider)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data(PushTokenDto::from(token))),
    ))
}

/// Notification routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/stream", get(stream_notifications))
        .route("/notifications/read", post(mark_all_read))
        .route("/notifications/push-tokens", post(register_push_token))
        .route("/notifications/{id}/read", post(mark_read))
}
