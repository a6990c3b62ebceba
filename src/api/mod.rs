//! REST API layer: route handlers, DTOs, authentication and router
//! composition.
//!
//! Resource endpoints are mounted under `/api/v1`; everything there except
//! registration passes through [`auth::require_actor`]. `/health`,
//! `/public/*` and, with the `swagger-ui` feature, `/swagger-ui` sit at
//! the root.

pub mod auth;
pub mod doc;
pub mod dto;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::config::AppConfig;
use crate::service::catalog_service::MAX_UPLOAD_BYTES;

/// Upper bound on producing a response head. Streamed bodies are not
/// affected.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Room for multipart framing on top of [`MAX_UPLOAD_BYTES`].
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Builds the complete application router.
pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    let protected = handlers::routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_actor,
    ));
    let api = Router::new()
        .merge(handlers::public_routes())
        .merge(protected);

    let public_root = config.storage.root.join(&config.storage.public_dir);
    let router = Router::new()
        .nest("/api/v1", api)
        .merge(handlers::system::routes())
        .nest_service("/public", ServeDir::new(public_root));

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", doc::ApiDoc::openapi()),
        )
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(cors_layer(&config.cors_allowed_origins)),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD))
        .with_state(state)
}

/// Permissive when no origins are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
