//! Data Transfer Objects for REST request/response serialization.
//!
//! Identifiers cross the wire as plain UUIDs; domain newtypes are restored
//! at the handler boundary.

pub mod account_dto;
pub mod borrowing_dto;
pub mod catalog_dto;
pub mod common_dto;
pub mod membership_dto;
pub mod notification_dto;

pub use account_dto::*;
pub use borrowing_dto::*;
pub use catalog_dto::*;
pub use common_dto::*;
pub use membership_dto::*;
pub use notification_dto::*;
