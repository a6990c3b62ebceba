//! Book, import, upload and review handlers.

use std::collections::HashMap;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use crate::api::dto::{
    BookDto, BookFieldsDto, CreateBookRequest, CreateReviewRequest, Envelope, ImportConfirmRequest,
    ImportForm, ImportPreviewDto, JobDto, LibraryQuery, Meta, ReviewDto, SetCoverRequest,
    UploadForm, UploadResponse,
};
use crate::app_state::AppState;
use crate::domain::{Actor, BookId, BorrowingId, LibraryId};
use crate::error::{AppError, ErrorResponse};
use crate::ports::Page;
use crate::service::import::ImportPayload;

/// `POST /books`: Add a book to a library.
///
/// # Errors
///
/// Returns [`AppError`] on authorization, validation or duplicate code.
#[utoipa::path(
    post,
    path = "/api/v1/books",
    tag = "Books",
    summary = "Create a book",
    description = "Adds a book. `cover_key`, when given, must be a key returned by `POST /files/upload`; the upload is promoted to public storage.",
    request_body = CreateBookRequest,
    responses(
        (status = 201, description = "Book created", body = Envelope<BookDto>),
        (status = 400, description = "Duplicate code", body = ErrorResponse),
        (status = 401, description = "Not staff of the library", body = ErrorResponse),
        (status = 422, description = "Invalid fields", body = ErrorResponse),
    )
)]
pub async fn create_book(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateBookRequest>,
) -> Result<impl IntoResponse, AppError> {
    let book = state
        .catalog
        .create_book(
            &actor,
            req.library_id.into(),
            req.fields.into(),
            req.cover_key.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope::data(BookDto::from(book)))))
}

/// `GET /books`: A library's catalog.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] for unknown libraries.
#[utoipa::path(
    get,
    path = "/api/v1/books",
    tag = "Books",
    summary = "List books",
    params(LibraryQuery),
    responses(
        (status = 200, description = "Books of the library", body = Envelope<Vec<BookDto>>),
        (status = 404, description = "Library not found", body = ErrorResponse),
    )
)]
pub async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let books = state
        .catalog
        .list_books(LibraryId::from(query.library_id))
        .await?;
    let total = i64::try_from(books.len()).unwrap_or(i64::MAX);
    let data: Vec<BookDto> = books.into_iter().map(Into::into).collect();
    Ok(Json(Envelope::page(
        data,
        Meta::new(total, Page::new(0, total.max(1))),
    )))
}

/// `GET /books/{id}`: Book details.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] for unknown books.
#[utoipa::path(
    get,
    path = "/api/v1/books/{id}",
    tag = "Books",
    summary = "Get a book",
    params(("id" = uuid::Uuid, Path, description = "Book UUID")),
    responses(
        (status = 200, description = "Book", body = Envelope<BookDto>),
        (status = 404, description = "Book not found", body = ErrorResponse),
    )
)]
pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let book = state.catalog.get_book(BookId::from(id)).await?;
    Ok(Json(Envelope::data(BookDto::from(book))))
}

/// `PUT /books/{id}`: Replace a book's catalog fields.
///
/// # Errors
///
/// Returns `no_changes_detected` when nothing differs.
#[utoipa::path(
    put,
    path = "/api/v1/books/{id}",
    tag = "Books",
    summary = "Update a book",
    params(("id" = uuid::Uuid, Path, description = "Book UUID")),
    request_body = BookFieldsDto,
    responses(
        (status = 200, description = "Book updated", body = Envelope<BookDto>),
        (status = 400, description = "No changes or duplicate code", body = ErrorResponse),
        (status = 404, description = "Book not found", body = ErrorResponse),
    )
)]
pub async fn update_book(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<BookFieldsDto>,
) -> Result<impl IntoResponse, AppError> {
    let book = state
        .catalog
        .update_book(&actor, BookId::from(id), req.into())
        .await?;
    Ok(Json(Envelope::data(BookDto::from(book))))
}

/// `POST /books/{id}/cover`: Promote an upload to the book's cover.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] for an unknown book or upload key.
#[utoipa::path(
    post,
    path = "/api/v1/books/{id}/cover",
    tag = "Books",
    summary = "Set a book cover",
    params(("id" = uuid::Uuid, Path, description = "Book UUID")),
    request_body = SetCoverRequest,
    responses(
        (status = 200, description = "Cover set", body = Envelope<BookDto>),
        (status = 404, description = "Book or upload not found", body = ErrorResponse),
    )
)]
pub async fn set_cover(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<SetCoverRequest>,
) -> Result<impl IntoResponse, AppError> {
    let book = state
        .catalog
        .set_cover(&actor, BookId::from(id), &req.key)
        .await?;
    Ok(Json(Envelope::data(BookDto::from(book))))
}

/// `POST /books/import`: Upload and preview a CSV import.
///
/// # Errors
///
/// Returns [`AppError::Validation`] for a missing file or unusable header.
#[utoipa::path(
    post,
    path = "/api/v1/books/import",
    tag = "Books",
    summary = "Preview a book import",
    description = "Stores the CSV and classifies every row as create, update or invalid. Nothing is written to the catalog.",
    request_body(content = ImportForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Preview", body = Envelope<ImportPreviewDto>),
        (status = 401, description = "Not staff of the library", body = ErrorResponse),
        (status = 422, description = "Unusable file", body = ErrorResponse),
    )
)]
pub async fn preview_import(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_form(multipart).await?;
    let library_id: LibraryId = form
        .fields
        .get("library_id")
        .ok_or_else(|| AppError::Validation("library_id is required".into()))?
        .parse()
        .map_err(|_| AppError::Validation("library_id is not a UUID".into()))?;
    let file = form
        .file
        .ok_or_else(|| AppError::Validation("file is required".into()))?;

    let preview = state
        .imports
        .preview(&actor, library_id, &file.name, file.bytes)
        .await?;
    Ok(Json(Envelope::data(ImportPreviewDto::from(preview))))
}

/// `POST /books/import/confirm`: Apply a previewed import in the background.
///
/// # Errors
///
/// Returns [`AppError::Validation`] for a foreign path,
/// [`AppError::Unauthorized`] without a staff position.
#[utoipa::path(
    post,
    path = "/api/v1/books/import/confirm",
    tag = "Books",
    summary = "Confirm a book import",
    request_body = ImportConfirmRequest,
    responses(
        (status = 201, description = "Import job submitted", body = Envelope<JobDto>),
        (status = 401, description = "Not staff of the library", body = ErrorResponse),
        (status = 422, description = "Path outside the library's imports", body = ErrorResponse),
    )
)]
pub async fn confirm_import(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<ImportConfirmRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payload = ImportPayload {
        path: req.path,
        library_id: req.library_id.into(),
    };
    let job = state.imports.confirm(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(Envelope::data(JobDto::from(job)))))
}

/// `POST /files/upload`: Store a temporary upload.
///
/// # Errors
///
/// Returns [`AppError::Validation`] for a missing, empty or oversized file.
#[utoipa::path(
    post,
    path = "/api/v1/files/upload",
    tag = "Files",
    summary = "Upload a file",
    description = "Stores the file under the temp root and returns a key usable as `cover_key`.",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Stored", body = Envelope<UploadResponse>),
        (status = 422, description = "Missing or oversized file", body = ErrorResponse),
    )
)]
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let file = read_form(multipart)
        .await?
        .file
        .ok_or_else(|| AppError::Validation("file is required".into()))?;
    let key = state
        .catalog
        .upload(&actor, &file.name, &file.content_type, &file.bytes)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data(UploadResponse { key })),
    ))
}

/// `POST /reviews`: Review a returned borrowing.
///
/// # Errors
///
/// Returns `borrowing_not_resolved` or `already_reviewed` invariants.
#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    tag = "Reviews",
    summary = "Review a loan",
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review created", body = Envelope<ReviewDto>),
        (status = 400, description = "Not returned or already reviewed", body = ErrorResponse),
        (status = 401, description = "Not the borrower", body = ErrorResponse),
    )
)]
pub async fn create_review(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let review = state
        .catalog
        .review(
            &actor,
            BorrowingId::from(req.borrowing_id),
            req.rating,
            req.comment,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::data(ReviewDto::from(review))),
    ))
}

/// Catalog routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/books", post(create_book).get(list_books))
        .route("/books/import", post(preview_import))
        .route("/books/import/confirm", post(confirm_import))
        .route("/books/{id}", get(get_book).put(update_book))
        .route("/books/{id}/cover", post(set_cover))
        .route("/files/upload", post(upload_file))
        .route("/reviews", post(create_review))
}

// ── Multipart Helpers ───────────────────────────────────────────────────

struct UploadedFile {
    name: String,
    content_type: String,
    bytes: Vec<u8>,
}

struct Form {
    file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

/// Collects the `file` part and every text part of a multipart body.
async fn read_form(mut multipart: Multipart) -> Result<Form, AppError> {
    let bad = |e: axum::extract::multipart::MultipartError| AppError::Validation(e.body_text());
    let mut form = Form {
        file: None,
        fields: HashMap::new(),
    };
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "file" {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(bad)?;
            form.file = Some(UploadedFile {
                name: filename,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(bad)?;
            form.fields.insert(name, value.trim().to_string());
        }
    }
    Ok(form)
}
