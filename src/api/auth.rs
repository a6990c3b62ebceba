//! Request authentication middleware.
//!
//! Resolves the caller into an [`Actor`] and stores it in the request
//! extensions; handlers read it with `Extension<Actor>`.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::app_state::AppState;
use crate::domain::{Actor, UserId};
use crate::error::AppError;

/// Development header carrying a raw user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Rejects requests without a resolvable actor with `401`.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] for missing or invalid credentials.
pub async fn require_actor(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = resolve_actor(&state, req.headers()).await?;
    tracing::debug!(user_id = %actor.user_id, role = %actor.role, "request authenticated");
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

async fn resolve_actor(state: &AppState, headers: &HeaderMap) -> Result<Actor, AppError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return state.accounts.actor_from_token(token).await;
    }

    if state.allow_user_id_header {
        if let Some(raw) = headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()) {
            let user_id: UserId = raw
                .trim()
                .parse()
                .map_err(|_| AppError::Unauthorized("malformed X-User-Id header".into()))?;
            return state.accounts.actor_from_user_id(user_id).await;
        }
    }

    Err(AppError::Unauthorized("missing bearer token".into()))
}
