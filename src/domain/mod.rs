//! Domain layer: entities, invariants and the notification hub.
//!
//! Types here are independent of HTTP and storage. Entities reference each
//! other by id only; eager-loaded shapes such as [`BorrowingView`] are
//! assembled by repositories on request.

pub mod actor;
pub mod borrowing;
pub mod catalog;
pub mod ids;
pub mod job;
pub mod library;
pub mod membership;
pub mod notification;
pub mod notification_hub;

pub use actor::{Actor, GlobalRole, StaffRole};
pub use borrowing::{
    AdmissionContext, BorrowRequest, Borrowing, BorrowingContext, BorrowingFilter,
    BorrowingStatus, BorrowingView, Lost, LostReport, Resolution, ReturnRequest, Returning,
};
pub use catalog::{Asset, AssetOwner, Book, BookFields, Review};
pub use ids::{
    AssetId, BookId, BorrowingId, CollectionId, JobId, LibraryId, MembershipId, NotificationId,
    PushTokenId, ReviewId, StaffId, SubscriptionId, UserId,
};
pub use job::{Job, JobStatus, JobType};
pub use library::{AuthUser, Library, Staff, User};
pub use membership::{
    Membership, MembershipPatch, MembershipPlan, Subscription, SubscriptionPatch,
    SubscriptionTerms,
};
pub use notification::{Notification, PushProvider, PushToken, ReferenceType};
pub use notification_hub::NotificationHub;
