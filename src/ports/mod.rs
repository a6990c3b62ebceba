//! Service contracts at the boundary of the core.
//!
//! The core depends only on these traits; concrete adapters live in
//! [`crate::persistence`], [`crate::queue`] and [`crate::adapters`].

pub mod external;
pub mod queue;
pub mod repository;

pub use external::{FileStorage, IdentityProvider, Mailer, PushDispatcher, VerifiedToken};
pub use queue::{QueueName, TaskEnvelope, TaskQueue};
pub use repository::{AdmitFn, Listing, NotificationListing, Page, Repository, ResolveFn};
