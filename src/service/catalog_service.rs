//! Books, covers, uploads and reviews.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    Actor, Asset, AssetId, AssetOwner, Book, BookFields, BookId, BorrowingId, LibraryId,
    Resolution, Review,
};
use crate::error::{AppError, Invariant};
use crate::ports::external::temp_upload_path;
use crate::ports::{FileStorage, Repository};
use crate::service::authz::{self, Permission};

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Catalog maintenance and reader reviews.
#[derive(Debug, Clone)]
pub struct CatalogService {
    repo: Arc<dyn Repository>,
    storage: Arc<dyn FileStorage>,
}

impl CatalogService {
    /// Creates a new `CatalogService`.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, storage: Arc<dyn FileStorage>) -> Self {
        Self { repo, storage }
    }

    /// Adds a book, optionally promoting an uploaded cover.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `Validation`, `DuplicateBookCode`, or `NotFound`
    /// for an unknown library or upload key.
    pub async fn create_book(
        &self,
        actor: &Actor,
        library_id: LibraryId,
        fields: BookFields,
        cover_key: Option<&str>,
    ) -> Result<Book, AppError> {
        authz::authorize(self.repo.as_ref(), actor, library_id, Permission::FrontDesk).await?;
        self.repo.get_library(library_id).await?;
        let book = Book::new(library_id, fields.validated()?, Utc::now());
        self.repo.insert_book(&book).await?;
        tracing::info!(book_id = %book.id, %library_id, code = %book.code, "book created");

        match cover_key {
            Some(key) => self.attach_cover(book, key).await,
            None => Ok(book),
        }
    }

    /// Overwrites a book's catalog fields.
    ///
    /// # Errors
    ///
    /// `NoChangesDetected` when nothing differs, `DuplicateBookCode`,
    /// `Unauthorized`, `Validation`, `NotFound`.
    pub async fn update_book(
        &self,
        actor: &Actor,
        id: BookId,
        fields: BookFields,
    ) -> Result<Book, AppError> {
        let mut book = self.repo.get_book(id).await?;
        authz::authorize(self.repo.as_ref(), actor, book.library_id, Permission::FrontDesk)
            .await?;
        let fields = fields.validated()?;
        if book.matches(&fields) {
            return Err(Invariant::NoChangesDetected.into());
        }
        book.apply(fields, Utc::now());
        self.repo.update_book(&book).await?;
        tracing::info!(book_id = %id, "book updated");
        Ok(book)
    }

    /// Replaces a book's cover with a promoted upload.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, or `NotFound` for the book or upload key.
    pub async fn set_cover(&self, actor: &Actor, id: BookId, key: &str) -> Result<Book, AppError> {
        let book = self.repo.get_book(id).await?;
        authz::authorize(self.repo.as_ref(), actor, book.library_id, Permission::FrontDesk)
            .await?;
        self.attach_cover(book, key).await
    }

    /// Loads a book.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub async fn get_book(&self, id: BookId) -> Result<Book, AppError> {
        self.repo.get_book(id).await
    }

    /// Lists a library's books.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown library.
    pub async fn list_books(&self, library_id: LibraryId) -> Result<Vec<Book>, AppError> {
        self.repo.get_library(library_id).await?;
        self.repo.list_books(library_id).await
    }

    /// Stores an upload under the temp root and returns its key.
    ///
    /// # Errors
    ///
    /// `Validation` for empty or oversized files, or the storage failure.
    pub async fn upload(
        &self,
        actor: &Actor,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, AppError> {
        if bytes.is_empty() {
            return Err(AppError::Validation("file is empty".into()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Validation(format!(
                "file exceeds {MAX_UPLOAD_BYTES} bytes"
            )));
        }
        let key = temp_upload_path(actor.user_id, Utc::now(), filename);
        self.storage.put_temp(&key, bytes, content_type).await?;
        tracing::debug!(user_id = %actor.user_id, %key, size = bytes.len(), "upload stored");
        Ok(key)
    }

    /// Reviews a returned borrowing of the actor.
    ///
    /// # Errors
    ///
    /// `BorrowingNotResolved` unless the book was returned,
    /// `AlreadyReviewed`, `Unauthorized` for someone else's loan,
    /// `Validation` for an out-of-range rating.
    pub async fn review(
        &self,
        actor: &Actor,
        borrowing_id: BorrowingId,
        rating: i16,
        comment: Option<String>,
    ) -> Result<Review, AppError> {
        let ctx = self.repo.get_borrowing_context(borrowing_id).await?;
        if ctx.user_id != actor.user_id && !actor.is_global_admin() {
            return Err(AppError::Unauthorized(
                "only the borrower may review a loan".into(),
            ));
        }
        if !matches!(ctx.borrowing.resolution, Some(Resolution::Returned(_))) {
            return Err(Invariant::BorrowingNotResolved.into());
        }
        let review = Review::new(borrowing_id, rating, comment, Utc::now())?;
        self.repo.insert_review(&review).await?;
        tracing::info!(%borrowing_id, rating, "review created");
        Ok(review)
    }

    async fn attach_cover(&self, mut book: Book, key: &str) -> Result<Book, AppError> {
        let url = self.storage.promote(key).await?;
        let asset = Asset {
            id: AssetId::new(),
            owner: AssetOwner::BookCover(book.id),
            kind: "cover".to_string(),
            path: url.clone(),
            is_primary: true,
            position: 0,
            colors: BTreeMap::new(),
        };
        self.repo.insert_asset(&asset).await?;
        book.cover = Some(url);
        book.updated_at = Utc::now();
        self.repo.update_book(&book).await?;
        tracing::info!(book_id = %book.id, "cover attached");
        Ok(book)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::adapters::MemoryFileStorage;
    use crate::domain::{GlobalRole, Library, UserId};
    use crate::persistence::InMemoryRepository;

    fn fields(code: &str, title: &str) -> BookFields {
        BookFields {
            code: code.into(),
            title: title.into(),
            author: "Author".into(),
            year: 2001,
        }
    }

    async fn setup() -> (CatalogService, Arc<MemoryFileStorage>, Actor, LibraryId) {
        let repo = Arc::new(InMemoryRepository::new());
        let library = Library {
            id: LibraryId::new(),
            name: "Branch".into(),
            address: None,
            description: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        assert!(repo.insert_library(&library).await.is_ok());
        let storage = Arc::new(MemoryFileStorage::new());
        let service = CatalogService::new(repo, Arc::clone(&storage) as Arc<dyn FileStorage>);
        let admin = Actor::new(UserId::new(), GlobalRole::Admin);
        (service, storage, admin, library.id)
    }

    #[tokio::test]
    async fn unchanged_update_is_rejected() {
        let (service, _, admin, library_id) = setup().await;
        let Ok(book) = service
            .create_book(&admin, library_id, fields("A1", "Dune"), None)
            .await
        else {
            panic!("create should succeed");
        };
        let Err(err) = service.update_book(&admin, book.id, fields("A1", "Dune")).await else {
            panic!("no-op update must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::NoChangesDetected));
    }

    #[tokio::test]
    async fn duplicate_code_in_library_is_rejected() {
        let (service, _, admin, library_id) = setup().await;
        assert!(
            service
                .create_book(&admin, library_id, fields("A1", "Dune"), None)
                .await
                .is_ok()
        );
        let Err(err) = service
            .create_book(&admin, library_id, fields("A1", "Emma"), None)
            .await
        else {
            panic!("duplicate code must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::DuplicateBookCode));
    }

    #[tokio::test]
    async fn uploaded_cover_is_promoted() {
        let (service, storage, admin, library_id) = setup().await;
        let Ok(key) = service
            .upload(&admin, "cover.png", "image/png", b"\x89PNG")
            .await
        else {
            panic!("upload should succeed");
        };
        let Ok(book) = service
            .create_book(&admin, library_id, fields("C3", "Covered"), Some(&key))
            .await
        else {
            panic!("create should succeed");
        };
        assert!(book.cover.is_some());
        assert!(storage.is_public(&key));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let (service, _, admin, _) = setup().await;
        assert!(matches!(
            service.upload(&admin, "x.png", "image/png", b"").await,
            Err(AppError::Validation(_))
        ));
    }
}
