//! Process-local [`IdentityProvider`].
//!
//! Subjects live in memory and a bearer token is the subject id itself.
//! Suitable for local runs and tests; production deployments plug in a
//! real provider behind the same trait.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::AppError;
use crate::ports::{IdentityProvider, VerifiedToken};

#[derive(Debug)]
struct Subject {
    email: String,
    claims: serde_json::Value,
}

/// In-memory identity provider.
#[derive(Debug, Default)]
pub struct LocalIdentityProvider {
    subjects: Mutex<HashMap<String, Subject>>,
}

impl LocalIdentityProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn create_user(
        &self,
        email: &str,
        password: &str,
        _display_name: &str,
    ) -> Result<String, AppError> {
        if password.len() < 6 {
            return Err(AppError::Validation(
                "password must be at least 6 characters".into(),
            ));
        }
        let mut subjects = self.subjects.lock().unwrap_or_else(PoisonError::into_inner);
        let email = email.to_lowercase();
        if subjects.values().any(|s| s.email == email) {
            return Err(AppError::Validation("email is already registered".into()));
        }
        let uid = format!("local-{}", uuid::Uuid::new_v4().simple());
        subjects.insert(
            uid.clone(),
            Subject {
                email,
                claims: serde_json::json!({}),
            },
        );
        Ok(uid)
    }

    async fn verify_id_token(&self, token: &str) -> Result<VerifiedToken, AppError> {
        let subjects = self.subjects.lock().unwrap_or_else(PoisonError::into_inner);
        let subject = subjects
            .get(token)
            .ok_or_else(|| AppError::Unauthorized("invalid token".into()))?;
        Ok(VerifiedToken {
            uid: token.to_string(),
            claims: subject.claims.clone(),
        })
    }

    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: serde_json::Value,
    ) -> Result<(), AppError> {
        let mut subjects = self.subjects.lock().unwrap_or_else(PoisonError::into_inner);
        let subject = subjects
            .get_mut(uid)
            .ok_or_else(|| AppError::upstream("identity", format!("unknown subject {uid}")))?;
        subject.claims = claims;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_subject_verifies_with_claims() {
        let idp = LocalIdentityProvider::new();
        let Ok(uid) = idp.create_user("a@b.test", "secret1", "A").await else {
            panic!("create should succeed");
        };
        assert!(
            idp.set_custom_claims(&uid, serde_json::json!({"role": "USER"}))
                .await
                .is_ok()
        );
        let Ok(token) = idp.verify_id_token(&uid).await else {
            panic!("token should verify");
        };
        assert_eq!(token.claims["role"], "USER");
        assert!(matches!(
            idp.verify_id_token("forged").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(idp.create_user("A@b.test", "secret1", "A").await.is_err());
    }
}
