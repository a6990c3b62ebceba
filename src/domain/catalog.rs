//! Catalog entities: books, reviews and image assets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssetId, BookId, BorrowingId, CollectionId, LibraryId, ReviewId};
use crate::error::AppError;

/// A book in a library's catalog. `code` is unique per library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Book id.
    pub id: BookId,
    /// Owning library.
    pub library_id: LibraryId,
    /// Library-local shelf code.
    pub code: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year (0 when unknown).
    pub year: i32,
    /// Public path of the cover image.
    pub cover: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The mutable catalog fields of a [`Book`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookFields {
    /// Shelf code.
    pub code: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year.
    pub year: i32,
}

impl BookFields {
    /// Trims text fields and rejects empty required values.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] naming the first empty field.
    pub fn validated(self) -> Result<Self, AppError> {
        let fields = Self {
            code: self.code.trim().to_string(),
            title: self.title.trim().to_string(),
            author: self.author.trim().to_string(),
            year: self.year,
        };
        if fields.title.is_empty() {
            return Err(AppError::Validation("title is required".into()));
        }
        if fields.author.is_empty() {
            return Err(AppError::Validation("author is required".into()));
        }
        if fields.code.is_empty() {
            return Err(AppError::Validation("code is required".into()));
        }
        Ok(fields)
    }
}

impl Book {
    /// Builds a new, not yet persisted book.
    #[must_use]
    pub fn new(library_id: LibraryId, fields: BookFields, now: DateTime<Utc>) -> Self {
        Self {
            id: BookId::new(),
            library_id,
            code: fields.code,
            title: fields.title,
            author: fields.author,
            year: fields.year,
            cover: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Returns `true` if every mutable field already equals `fields`.
    #[must_use]
    pub fn matches(&self, fields: &BookFields) -> bool {
        self.code == fields.code
            && self.title == fields.title
            && self.author == fields.author
            && self.year == fields.year
    }

    /// Overwrites the mutable fields.
    pub fn apply(&mut self, fields: BookFields, now: DateTime<Utc>) {
        self.code = fields.code;
        self.title = fields.title;
        self.author = fields.author;
        self.year = fields.year;
        self.updated_at = now;
    }
}

/// A rating left on a returned borrowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Review id.
    pub id: ReviewId,
    /// Reviewed borrowing.
    pub borrowing_id: BorrowingId,
    /// Rating in `0..=5`.
    pub rating: i16,
    /// Optional comment.
    pub comment: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Maximum rating.
    pub const MAX_RATING: i16 = 5;

    /// Builds a review after range-checking the rating.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when `rating` is outside `0..=5`.
    pub fn new(
        borrowing_id: BorrowingId,
        rating: i16,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if !(0..=Self::MAX_RATING).contains(&rating) {
            return Err(AppError::Validation(format!(
                "rating must be between 0 and {}",
                Self::MAX_RATING
            )));
        }
        Ok(Self {
            id: ReviewId::new(),
            borrowing_id,
            rating,
            comment: comment.filter(|c| !c.trim().is_empty()),
            created_at: now,
        })
    }
}

/// Owner of a stored asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "owner_type", content = "owner_id", rename_all = "snake_case")]
pub enum AssetOwner {
    /// Cover image of a book.
    BookCover(BookId),
    /// Cover image of a collection.
    CollectionCover(CollectionId),
}

impl AssetOwner {
    /// Flattens to the `(owner_type, owner_id)` storage pair.
    #[must_use]
    pub fn to_parts(self) -> (&'static str, uuid::Uuid) {
        match self {
            Self::BookCover(id) => ("book", id.into()),
            Self::CollectionCover(id) => ("collection", id.into()),
        }
    }

    /// Rebuilds an owner from its storage pair.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] for an unknown owner type.
    pub fn from_parts(owner_type: &str, owner_id: uuid::Uuid) -> Result<Self, AppError> {
        match owner_type {
            "book" => Ok(Self::BookCover(BookId::from_uuid(owner_id))),
            "collection" => Ok(Self::CollectionCover(CollectionId::from_uuid(owner_id))),
            other => Err(AppError::Internal(format!("unknown asset owner: {other}"))),
        }
    }
}

/// An RGBA colour sampled from an image.
pub type Rgba = [u8; 4];

/// A blob reference attached to a catalog entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset id.
    pub id: AssetId,
    /// Entity the asset belongs to.
    pub owner: AssetOwner,
    /// Asset kind, e.g. `"cover"`.
    pub kind: String,
    /// Public storage path.
    pub path: String,
    /// Whether this is the owner's primary asset of its kind.
    pub is_primary: bool,
    /// Display ordering.
    pub position: i32,
    /// Dominant colours keyed by ordinal.
    pub colors: BTreeMap<u8, Rgba>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn fields(code: &str, title: &str, author: &str, year: i32) -> BookFields {
        BookFields {
            code: code.into(),
            title: title.into(),
            author: author.into(),
            year,
        }
    }

    #[test]
    fn validated_trims_and_requires_fields() {
        let Ok(f) = fields(" A1 ", " Dune ", "Herbert", 1965).validated() else {
            panic!("fields should be valid");
        };
        assert_eq!(f.code, "A1");
        assert_eq!(f.title, "Dune");

        let Err(AppError::Validation(msg)) = fields("A1", "", "X", 0).validated() else {
            panic!("empty title must fail");
        };
        assert_eq!(msg, "title is required");
        assert!(fields("", "T", "X", 0).validated().is_err());
        assert!(fields("A1", "T", " ", 0).validated().is_err());
    }

    #[test]
    fn matches_detects_no_change() {
        let book = Book::new(LibraryId::new(), fields("A1", "Old", "X", 2000), Utc::now());
        assert!(book.matches(&fields("A1", "Old", "X", 2000)));
        assert!(!book.matches(&fields("A1", "Old", "X", 2001)));
    }

    #[test]
    fn review_rating_is_range_checked() {
        let id = BorrowingId::new();
        assert!(Review::new(id, 0, None, Utc::now()).is_ok());
        assert!(Review::new(id, 5, Some("great".into()), Utc::now()).is_ok());
        assert!(Review::new(id, 6, None, Utc::now()).is_err());
        assert!(Review::new(id, -1, None, Utc::now()).is_err());
    }

    #[test]
    fn asset_owner_flattens_and_restores() {
        let owner = AssetOwner::BookCover(BookId::new());
        let (kind, id) = owner.to_parts();
        assert_eq!(kind, "book");
        let Ok(restored) = AssetOwner::from_parts(kind, id) else {
            panic!("known owner type");
        };
        assert_eq!(restored, owner);
        assert!(AssetOwner::from_parts("shelf", id).is_err());
    }
}
