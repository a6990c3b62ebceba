//! OpenAPI documentation.
//!
//! [`ApiDoc`] collects every annotated handler. Request and response
//! schemas are picked up from the handler annotations; the bearer
//! security scheme is added by [`SecurityAddon`].

use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::api::handlers::{account, borrowing, catalog, job, membership, notification, system};
use crate::error::ErrorResponse;

/// Registers the `bearer` scheme used by every authenticated route.
#[derive(Debug)]
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                Http::builder()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("ID token issued by the identity provider."))
                    .build(),
            ),
        );
    }
}

/// OpenAPI document for the REST API.
#[derive(Debug, OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "librarium",
        description = "Multi-tenant library backend: catalog, memberships, loans, notifications and bulk jobs."
    ),
    security(("bearer" = [])),
    paths(
        system::health_handler,
        account::register,
        account::me,
        account::create_library,
        account::get_library,
        account::create_staff,
        catalog::create_book,
        catalog::list_books,
        catalog::get_book,
        catalog::update_book,
        catalog::set_cover,
        catalog::preview_import,
        catalog::confirm_import,
        catalog::upload_file,
        catalog::create_review,
        membership::create_membership,
        membership::list_memberships,
        membership::get_membership,
        membership::update_membership,
        membership::delete_membership,
        membership::create_subscription,
        membership::get_subscription,
        membership::update_subscription,
        borrowing::create_borrowing,
        borrowing::list_borrowings,
        borrowing::get_borrowing,
        borrowing::return_borrowing,
        borrowing::report_lost,
        borrowing::export_borrowings,
        notification::list_notifications,
        notification::stream_notifications,
        notification::mark_all_read,
        notification::mark_read,
        notification::register_push_token,
        job::get_job,
        job::download,
    ),
    components(schemas(ErrorResponse)),
    tags(
        (name = "System", description = "Health probes"),
        (name = "Auth", description = "Registration and the current account"),
        (name = "Libraries", description = "Tenants and their staff"),
        (name = "Books", description = "Catalog, covers and CSV import"),
        (name = "Files", description = "Temporary uploads"),
        (name = "Reviews", description = "Reviews of returned loans"),
        (name = "Memberships", description = "Plans and grandfathered subscriptions"),
        (name = "Borrowings", description = "Loan lifecycle and CSV export"),
        (name = "Notifications", description = "Inbox, live stream and push tokens"),
        (name = "Jobs", description = "Background job status and downloads"),
    )
)]
pub struct ApiDoc;
