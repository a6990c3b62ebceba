//! Notification emission, inbox operations and the per-user live stream.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    Actor, Notification, NotificationHub, NotificationId, PushProvider, PushToken, PushTokenId,
    ReferenceType, UserId,
};
use crate::error::AppError;
use crate::ports::{NotificationListing, Page, PushDispatcher, Repository};

/// Writes notifications and serves a user's inbox.
///
/// Emission inserts the row (the store then announces it to the hub) and
/// pushes to the recipient's registered devices on a best-effort basis.
#[derive(Debug, Clone)]
pub struct NotificationService {
    repo: Arc<dyn Repository>,
    push: Arc<dyn PushDispatcher>,
    hub: NotificationHub,
}

impl NotificationService {
    /// Creates a new `NotificationService`.
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        push: Arc<dyn PushDispatcher>,
        hub: NotificationHub,
    ) -> Self {
        Self { repo, push, hub }
    }

    /// Inserts a notification and pushes it to the user's devices.
    ///
    /// Push failures are logged and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns an error only if the row cannot be inserted.
    pub async fn emit(
        &self,
        user_id: UserId,
        title: &str,
        message: &str,
        reference: Option<(ReferenceType, uuid::Uuid)>,
    ) -> Result<Notification, AppError> {
        let notification = Notification::new(user_id, title, message, reference, Utc::now());
        self.repo.insert_notification(&notification).await?;

        match self.repo.list_push_tokens(user_id).await {
            Ok(tokens) => {
                for token in &tokens {
                    if let Err(e) = self.push.send(token, title, message).await {
                        tracing::warn!(%user_id, error = %e, "push delivery failed");
                    }
                }
            }
            Err(e) => tracing::warn!(%user_id, error = %e, "failed to load push tokens"),
        }

        tracing::debug!(%user_id, notification_id = %notification.id, "notification emitted");
        Ok(notification)
    }

    /// Emits on a detached task. Failures are logged only.
    pub fn emit_detached(
        &self,
        user_id: UserId,
        title: String,
        message: String,
        reference: Option<(ReferenceType, uuid::Uuid)>,
    ) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.emit(user_id, &title, &message, reference).await {
                tracing::error!(%user_id, error = %e, "failed to emit notification");
            }
        });
    }

    /// Lists the actor's notifications, newest first, with the unread count.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn list(&self, actor: &Actor, page: Page) -> Result<NotificationListing, AppError> {
        self.repo.list_notifications(actor.user_id, page).await
    }

    /// Marks one of the actor's notifications read. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the notification is not the actor's.
    pub async fn mark_read(
        &self,
        actor: &Actor,
        id: NotificationId,
    ) -> Result<Notification, AppError> {
        self.repo
            .mark_notification_read(actor.user_id, id, Utc::now())
            .await
    }

    /// Marks every unread notification of the actor read.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn mark_all_read(&self, actor: &Actor) -> Result<u64, AppError> {
        self.repo
            .mark_all_notifications_read(actor.user_id, Utc::now())
            .await
    }

    /// Registers a device token for the actor.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for an empty token.
    pub async fn register_push_token(
        &self,
        actor: &Actor,
        token: &str,
        provider: PushProvider,
    ) -> Result<PushToken, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Validation("token is required".into()));
        }
        let push_token = PushToken {
            id: PushTokenId::new(),
            user_id: actor.user_id,
            token: token.to_string(),
            provider,
            created_at: Utc::now(),
        };
        self.repo.upsert_push_token(&push_token).await?;
        Ok(push_token)
    }

    /// Opens the actor's live notification stream.
    ///
    /// The stream ends when `cancel` fires or the receiver is dropped.
    #[must_use]
    pub fn stream(&self, actor: &Actor, cancel: CancellationToken) -> mpsc::Receiver<Notification> {
        self.hub.user_stream(actor.user_id, cancel)
    }

    /// Number of open live streams in this process.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.hub.subscriber_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::LogPushDispatcher;
    use crate::domain::GlobalRole;
    use crate::persistence::InMemoryRepository;

    fn service() -> NotificationService {
        let hub = NotificationHub::new();
        let repo = Arc::new(InMemoryRepository::with_hub(hub.clone()));
        NotificationService::new(repo, Arc::new(LogPushDispatcher), hub)
    }

    #[tokio::test]
    async fn emitted_notification_reaches_only_its_user_stream() {
        let service = service();
        let alice = Actor::new(UserId::new(), GlobalRole::User);
        let bob = Actor::new(UserId::new(), GlobalRole::User);
        let cancel = CancellationToken::new();
        let mut alice_rx = service.stream(&alice, cancel.clone());
        let mut bob_rx = service.stream(&bob, cancel.clone());
        tokio::task::yield_now().await;

        let Ok(sent) = service.emit(alice.user_id, "Returned", "Thanks", None).await else {
            panic!("emit should succeed");
        };
        let Ok(Some(got)) = tokio::time::timeout(Duration::from_secs(1), alice_rx.recv()).await
        else {
            panic!("alice should receive her notification");
        };
        assert_eq!(got.id, sent.id);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), bob_rx.recv())
                .await
                .is_err()
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn inbox_counts_unread_and_mark_all_clears_them() {
        let service = service();
        let actor = Actor::new(UserId::new(), GlobalRole::User);
        for title in ["a", "b", "c"] {
            assert!(service.emit(actor.user_id, title, "m", None).await.is_ok());
        }
        let Ok(listing) = service.list(&actor, Page::default()).await else {
            panic!("list should succeed");
        };
        assert_eq!(listing.total, 3);
        assert_eq!(listing.unread, 3);

        let Ok(changed) = service.mark_all_read(&actor).await else {
            panic!("mark all should succeed");
        };
        assert_eq!(changed, 3);
        let Ok(listing) = service.list(&actor, Page::default()).await else {
            panic!("list should succeed");
        };
        assert_eq!(listing.unread, 0);
    }

    #[tokio::test]
    async fn empty_push_token_is_rejected() {
        let service = service();
        let actor = Actor::new(UserId::new(), GlobalRole::User);
        assert!(matches!(
            service
                .register_push_token(&actor, "  ", PushProvider::Fcm)
                .await,
            Err(AppError::Validation(_))
        ));
    }
}
