//! Postgres `LISTEN new_notification` loop feeding the [`NotificationHub`].
//!
//! One dedicated connection per process. Each payload is the inserted row
//! as JSON; it is decoded and published without blocking. A dropped
//! connection is re-established after [`RECONNECT_DELAY`].

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio_util::sync::CancellationToken;

use crate::domain::{Notification, NotificationHub};

/// Channel the notifications trigger publishes on.
pub const CHANNEL: &str = "new_notification";

/// Pause before re-opening a dropped listener connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Runs the listener until `cancel` fires.
pub async fn run(pool: PgPool, hub: NotificationHub, cancel: CancellationToken) {
    loop {
        match listen(&pool, &hub, &cancel).await {
            Ok(()) => break,
            Err(e) => {
                tracing::error!(error = %e, "notification listener failed, reconnecting");
            }
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
    tracing::info!("notification listener stopped");
}

async fn listen(
    pool: &PgPool,
    hub: &NotificationHub,
    cancel: &CancellationToken,
) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANNEL).await?;
    tracing::info!(channel = CHANNEL, "listening for notifications");

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            msg = listener.recv() => {
                let msg = msg?;
                dispatch(hub, msg.payload());
            }
        }
    }
}

/// Decodes one payload and publishes it. Returns the number of receivers.
///
/// Malformed payloads are logged and skipped.
pub fn dispatch(hub: &NotificationHub, payload: &str) -> usize {
    match serde_json::from_str::<Notification>(payload) {
        Ok(notification) => hub.publish(&notification),
        Err(e) => {
            tracing::warn!(error = %e, "discarding malformed notification payload");
            0
        }
    }
}
