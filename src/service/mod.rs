//! Service layer: business logic orchestration.
//!
//! Services take an explicit [`crate::domain::Actor`], authorize it against
//! staff rows through [`authz`], delegate invariants to the domain layer and
//! persistence to [`crate::ports::Repository`]. Side effects such as
//! notifications and broker pushes happen after the owning write commits.

pub mod account_service;
pub mod authz;
pub mod catalog_service;
pub mod export;
pub mod import;
pub mod job_service;
pub mod loan_service;
pub mod notification_service;
pub mod subscription_service;

pub use account_service::{AccountService, NewLibrary, Registration};
pub use catalog_service::CatalogService;
pub use import::ImportService;
pub use job_service::JobService;
pub use loan_service::{LoanService, LostInput, NewBorrowing, ReturnInput};
pub use notification_service::NotificationService;
pub use subscription_service::SubscriptionService;
