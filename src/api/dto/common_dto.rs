//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::ports::Page;

/// Success envelope: `{"data": …, "meta": {…}}`.
///
/// Errors use the same top-level keys through
/// [`crate::error::ErrorResponse`] (`error`, `message`).
#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope<T> {
    /// Payload.
    pub data: T,
    /// Paging metadata on list responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> Envelope<T> {
    /// Wraps a single resource.
    pub const fn data(data: T) -> Self {
        Self { data, meta: None }
    }

    /// Wraps a page of a listing.
    pub const fn page(data: T, meta: Meta) -> Self {
        Self {
            data,
            meta: Some(meta),
        }
    }
}

/// Paging metadata included in list responses.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct Meta {
    /// Total number of matching items.
    pub total: i64,
    /// Items skipped.
    pub skip: i64,
    /// Page size.
    pub limit: i64,
    /// Unread count, on notification listings only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread: Option<i64>,
}

impl Meta {
    /// Metadata for `page` out of `total` items.
    #[must_use]
    pub const fn new(total: i64, page: Page) -> Self {
        Self {
            total,
            skip: page.skip,
            limit: page.limit,
            unread: None,
        }
    }
}

/// Offset paging query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// Items to skip. Defaults to 0.
    pub skip: Option<i64>,
    /// Page size (max 100). Defaults to 20.
    pub limit: Option<i64>,
}

impl PageParams {
    /// Clamps into a [`Page`].
    #[must_use]
    pub fn page(self) -> Page {
        let default = Page::default();
        Page::new(
            self.skip.unwrap_or(default.skip),
            self.limit.unwrap_or(default.limit),
        )
    }
}

/// Filter by owning library.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LibraryQuery {
    /// Library UUID.
    pub library_id: uuid::Uuid,
}

/// Count of rows touched by a bulk update.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct UpdatedCount {
    /// Rows changed.
    pub updated: u64,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn page_params_clamp_and_default() {
        let page = PageParams {
            skip: Some(-3),
            limit: Some(1_000),
        }
        .page();
        assert_eq!(page, Page::new(0, Page::MAX_LIMIT));
        assert_eq!(PageParams::default().page(), Page::default());
    }

    #[test]
    fn single_resource_omits_meta() {
        let Ok(json) = serde_json::to_value(Envelope::data(1)) else {
            panic!("envelope serializes");
        };
        assert_eq!(json, serde_json::json!({ "data": 1 }));
    }
}
