//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::NotificationHub;
use crate::ports::{FileStorage, IdentityProvider, Mailer, PushDispatcher, Repository, TaskQueue};
use crate::service::{
    AccountService, CatalogService, ImportService, JobService, LoanService, NotificationService,
    SubscriptionService,
};
use crate::worker::TaskHandler;

/// The adapters a process runs with.
#[derive(Debug, Clone)]
pub struct Ports {
    /// Persistence.
    pub repo: Arc<dyn Repository>,
    /// Task broker.
    pub queue: Arc<dyn TaskQueue>,
    /// Object storage.
    pub storage: Arc<dyn FileStorage>,
    /// Identity provider.
    pub identity: Arc<dyn IdentityProvider>,
    /// Outbound mail.
    pub mailer: Arc<dyn Mailer>,
    /// Outbound push.
    pub push: Arc<dyn PushDispatcher>,
    /// In-process notification fan-out.
    pub hub: NotificationHub,
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Accounts, libraries and staff.
    pub accounts: AccountService,
    /// Books, covers, uploads and reviews.
    pub catalog: CatalogService,
    /// Membership plans and subscriptions.
    pub subscriptions: SubscriptionService,
    /// Loan lifecycle.
    pub loans: LoanService,
    /// Inbox and live stream.
    pub notifications: NotificationService,
    /// Background jobs.
    pub jobs: JobService,
    /// Book import pipeline.
    pub imports: ImportService,
    /// Honour the `X-User-Id` development header.
    pub allow_user_id_header: bool,
    repo: Arc<dyn Repository>,
    storage: Arc<dyn FileStorage>,
}

impl AppState {
    /// Wires every service over `ports`.
    #[must_use]
    pub fn new(ports: Ports, allow_user_id_header: bool) -> Self {
        let Ports {
            repo,
            queue,
            storage,
            identity,
            mailer,
            push,
            hub,
        } = ports;

        let notifications = NotificationService::new(Arc::clone(&repo), push, hub);
        let jobs = JobService::new(
            Arc::clone(&repo),
            queue,
            Arc::clone(&storage),
            notifications.clone(),
        );
        Self {
            accounts: AccountService::new(Arc::clone(&repo), identity, mailer),
            catalog: CatalogService::new(Arc::clone(&repo), Arc::clone(&storage)),
            subscriptions: SubscriptionService::new(Arc::clone(&repo)),
            loans: LoanService::new(Arc::clone(&repo), notifications.clone()),
            imports: ImportService::new(Arc::clone(&repo), Arc::clone(&storage), jobs.clone()),
            notifications,
            jobs,
            allow_user_id_header,
            repo,
            storage,
        }
    }

    /// Builds the worker-side dispatcher over the same services.
    #[must_use]
    pub fn task_handler(&self) -> TaskHandler {
        TaskHandler::new(
            Arc::clone(&self.repo),
            Arc::clone(&self.storage),
            self.jobs.clone(),
            self.loans.clone(),
        )
    }
}
