//! Fan-out hub for freshly inserted notifications.
//!
//! [`NotificationHub`] keeps a set of bounded subscriber channels behind a
//! mutex. Publishing never blocks: a subscriber whose channel is full
//! misses that notification, and a closed subscriber is pruned. The hub
//! is fed by the Postgres `LISTEN` loop in
//! [`crate::persistence::listener`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::{Notification, UserId};

/// Capacity of every subscriber channel.
pub const SUBSCRIBER_CAPACITY: usize = 10;

/// Handle returned by [`NotificationHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Default)]
struct HubInner {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Notification>>>,
    next_id: AtomicU64,
}

/// Process-wide notification fan-out.
///
/// Cheap to clone; all clones share one subscriber set.
#[derive(Debug, Clone, Default)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    /// Creates a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber channel.
    pub fn subscribe(&self, sender: mpsc::Sender<Notification>) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, sender);
        id
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.lock().remove(&id);
    }

    /// Delivers `notification` to every subscriber without blocking.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, notification: &Notification) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;
        subscribers.retain(|id, sender| match sender.try_send(notification.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    subscriber = id.0,
                    notification_id = %notification.id,
                    "subscriber channel full, dropping notification"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Returns the current number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Opens a stream of notifications addressed to `user_id`.
    ///
    /// A relay task subscribes an internal channel and forwards matching
    /// notifications, again without blocking. The relay stops when
    /// `cancel` fires or the returned receiver is dropped, and then
    /// unsubscribes.
    #[must_use]
    pub fn user_stream(
        &self,
        user_id: UserId,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Notification> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let subscriber = self.subscribe(inbound_tx);
        let hub = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = outbound_tx.closed() => break,
                    msg = inbound_rx.recv() => {
                        let Some(notification) = msg else { break };
                        if notification.user_id != user_id {
                            continue;
                        }
                        match outbound_tx.try_send(notification) {
                            Ok(()) => {}
                            Err(TrySendError::Full(dropped)) => {
                                tracing::warn!(
                                    %user_id,
                                    notification_id = %dropped.id,
                                    "stream consumer slow, dropping notification"
                                );
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            hub.unsubscribe(subscriber);
            inbound_rx.close();
            tracing::debug!(%user_id, "notification stream closed");
        });

        outbound_rx
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Notification>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    fn note(user_id: UserId, title: &str) -> Notification {
        Notification::new(user_id, title, "body", None, Utc::now())
    }

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let hub = NotificationHub::new();
        assert_eq!(hub.publish(&note(UserId::new(), "a")), 0);
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking_others() {
        let hub = NotificationHub::new();
        let user = UserId::new();

        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        hub.subscribe(slow_tx);
        hub.subscribe(fast_tx);

        assert_eq!(hub.publish(&note(user, "1")), 2);
        assert_eq!(hub.publish(&note(user, "2")), 1);
        assert_eq!(hub.publish(&note(user, "3")), 1);

        let Some(first) = slow_rx.recv().await else {
            panic!("first notification should be queued");
        };
        assert_eq!(first.title, "1");
        assert!(slow_rx.try_recv().is_err());

        for expected in ["1", "2", "3"] {
            let Some(n) = fast_rx.recv().await else {
                panic!("fast subscriber should receive all");
            };
            assert_eq!(n.title, expected);
        }
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let hub = NotificationHub::new();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        hub.subscribe(tx);
        drop(rx);
        assert_eq!(hub.publish(&note(UserId::new(), "x")), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn user_stream_filters_by_recipient() {
        let hub = NotificationHub::new();
        let me = UserId::new();
        let cancel = CancellationToken::new();
        let mut stream = hub.user_stream(me, cancel.clone());

        hub.publish(&note(UserId::new(), "other"));
        hub.publish(&note(me, "mine"));

        let received = tokio::time::timeout(Duration::from_secs(1), stream.recv()).await;
        let Ok(Some(n)) = received else {
            panic!("expected own notification");
        };
        assert_eq!(n.title, "mine");
        assert_eq!(n.user_id, me);
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancelling_stream_unsubscribes() {
        let hub = NotificationHub::new();
        let cancel = CancellationToken::new();
        let mut stream = hub.user_stream(UserId::new(), cancel.clone());
        assert_eq!(hub.subscriber_count(), 1);

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(1), stream.recv()).await;
        assert!(matches!(closed, Ok(None)));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
