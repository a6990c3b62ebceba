//! Log-only [`Mailer`] and [`PushDispatcher`].
//!
//! Both record the outbound message through `tracing` and succeed. They
//! stand in for SMTP and FCM/APNs clients outside production.

use async_trait::async_trait;

use crate::domain::PushToken;
use crate::error::AppError;
use crate::ports::{Mailer, PushDispatcher};

/// Mailer that logs instead of sending.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        tracing::info!(%to, %subject, body_len = body.len(), "mail");
        Ok(())
    }
}

/// Push dispatcher that logs instead of delivering.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushDispatcher;

#[async_trait]
impl PushDispatcher for LogPushDispatcher {
    async fn send(&self, token: &PushToken, title: &str, _body: &str) -> Result<(), AppError> {
        tracing::info!(
            user_id = %token.user_id,
            provider = token.provider.as_str(),
            %title,
            "push"
        );
        Ok(())
    }
}
