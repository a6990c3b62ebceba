//! REST endpoint handlers organized by resource.

pub mod account;
pub mod borrowing;
pub mod catalog;
pub mod job;
pub mod membership;
pub mod notification;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Routes under `/api/v1` that need no credentials.
pub fn public_routes() -> Router<AppState> {
    account::public_routes()
}

/// Routes under `/api/v1` that require an authenticated actor.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(account::routes())
        .merge(catalog::routes())
        .merge(membership::routes())
        .merge(borrowing::routes())
        .merge(notification::routes())
        .merge(job::routes())
}
