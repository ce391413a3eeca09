use chrono::{Duration, Utc};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;

use crate::db::{OneTimeToken, OneTimeTokenStore, TokenKind};
use crate::error::{AppError, Result};
use crate::secrets::{generate_token, hash_token};

/// Password-reset and email-verification tokens. Each is single-use and a
/// new one replaces any outstanding token of the same kind.
#[derive(Clone)]
pub struct OneTimeTokens {
    store: Arc<dyn OneTimeTokenStore>,
    password_reset_ttl: Duration,
    email_verification_ttl: Duration,
}

impl OneTimeTokens {
    pub fn new(
        store: Arc<dyn OneTimeTokenStore>,
        password_reset_ttl: Duration,
        email_verification_ttl: Duration,
    ) -> Self {
        Self {
            store,
            password_reset_ttl,
            email_verification_ttl,
        }
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::PasswordReset => self.password_reset_ttl,
            TokenKind::EmailVerification => self.email_verification_ttl,
        }
    }

    /// Returns the raw token; only its hash is stored.
    pub async fn issue(&self, user_id: ObjectId, kind: TokenKind) -> Result<String> {
        self.store.delete_for_user(&user_id, Some(kind)).await?;

        let token = generate_token();
        let now = Utc::now();
        let record = OneTimeToken {
            id: hash_token(&token),
            user_id,
            kind,
            expires_at: now + self.ttl(kind),
            created_at: now,
        };
        self.store.insert(&record).await?;

        log::debug!("Issued {} token for user {}", kind.as_str(), user_id.to_hex());
        Ok(token)
    }

    /// Returns the owner of the token and burns it.
    pub async fn consume(&self, kind: TokenKind, token: &str) -> Result<ObjectId> {
        let record = self
            .store
            .take(kind, &hash_token(token.trim()))
            .await?
            .ok_or(AppError::InvalidToken)?;

        if record.expires_at <= Utc::now() {
            return Err(AppError::InvalidToken);
        }
        Ok(record.user_id)
    }

    pub async fn revoke_all(&self, user_id: &ObjectId) -> Result<u64> {
        self.store.delete_for_user(user_id, None).await
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.store.delete_expired(Utc::now()).await?;
        if removed > 0 {
            log::info!("Cleaned up {} expired one-time tokens", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryTokenStore;

    fn tokens(reset_ttl: Duration) -> OneTimeTokens {
        OneTimeTokens::new(
            Arc::new(InMemoryTokenStore::default()),
            reset_ttl,
            Duration::hours(48),
        )
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let tokens = tokens(Duration::minutes(60));
        let user_id = ObjectId::new();

        let token = tokens.issue(user_id, TokenKind::PasswordReset).await.unwrap();
        assert_eq!(
            tokens.consume(TokenKind::PasswordReset, &token).await.unwrap(),
            user_id
        );
        assert!(matches!(
            tokens.consume(TokenKind::PasswordReset, &token).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_wrong_kind_is_rejected() {
        let tokens = tokens(Duration::minutes(60));
        let token = tokens
            .issue(ObjectId::new(), TokenKind::EmailVerification)
            .await
            .unwrap();

        assert!(tokens
            .consume(TokenKind::PasswordReset, &token)
            .await
            .is_err());
        assert!(tokens
            .consume(TokenKind::EmailVerification, &token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_reissue_replaces_previous_token() {
        let tokens = tokens(Duration::minutes(60));
        let user_id = ObjectId::new();

        let first = tokens.issue(user_id, TokenKind::PasswordReset).await.unwrap();
        let second = tokens.issue(user_id, TokenKind::PasswordReset).await.unwrap();

        assert!(tokens.consume(TokenKind::PasswordReset, &first).await.is_err());
        assert!(tokens.consume(TokenKind::PasswordReset, &second).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let tokens = tokens(Duration::zero());
        let token = tokens
            .issue(ObjectId::new(), TokenKind::PasswordReset)
            .await
            .unwrap();

        assert!(matches!(
            tokens.consume(TokenKind::PasswordReset, &token).await,
            Err(AppError::InvalidToken)
        ));
    }
}
