use chrono::{Duration, Utc};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;

use crate::db::{Session, SessionStore};
use crate::error::{AppError, Result};
use crate::secrets::{generate_token, hash_token};

/// A freshly created session together with the raw token for the cookie.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session: Session,
    /// The expiry was pushed out; the caller should re-send the cookie.
    pub refreshed: bool,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create_session(
        &self,
        user_id: ObjectId,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<IssuedSession> {
        let token = generate_token();
        let now = Utc::now();
        let session = Session {
            id: hash_token(&token),
            user_id,
            expires_at: now + self.ttl,
            created_at: now,
            ip_address,
            user_agent,
        };
        self.store.insert(&session).await?;

        log::info!("Created session for user {}", user_id.to_hex());

        Ok(IssuedSession { token, session })
    }

    pub async fn validate_session(&self, token: &str) -> Result<ValidatedSession> {
        let id = hash_token(token);
        let mut session = self
            .store
            .find(&id)
            .await?
            .ok_or(AppError::InvalidSession)?;

        let now = Utc::now();
        if session.is_expired_at(now) {
            self.store.delete(&id).await?;
            return Err(AppError::InvalidSession);
        }

        // Rolling expiry: active sessions never run out while in use.
        let refreshed = session.expires_at - now < self.ttl / 2;
        if refreshed {
            session.expires_at = now + self.ttl;
            self.store.update_expiry(&id, session.expires_at).await?;
            log::debug!("Extended session for user {}", session.user_id.to_hex());
        }

        Ok(ValidatedSession { session, refreshed })
    }

    pub async fn invalidate_session(&self, token: &str) -> Result<bool> {
        let removed = self.store.delete(&hash_token(token)).await?;
        if removed {
            log::info!("Invalidated session");
        }
        Ok(removed)
    }

    pub async fn invalidate_session_by_id(&self, session_id: &str) -> Result<bool> {
        self.store.delete(session_id).await
    }

    pub async fn invalidate_user_sessions(&self, user_id: &ObjectId) -> Result<u64> {
        let removed = self.store.delete_for_user(user_id).await?;
        log::info!(
            "Invalidated {} sessions for user {}",
            removed,
            user_id.to_hex()
        );
        Ok(removed)
    }

    pub async fn invalidate_other_sessions(
        &self,
        user_id: &ObjectId,
        keep_session_id: &str,
    ) -> Result<u64> {
        let removed = self
            .store
            .delete_other_for_user(user_id, keep_session_id)
            .await?;
        log::info!(
            "Invalidated {} other sessions for user {}",
            removed,
            user_id.to_hex()
        );
        Ok(removed)
    }

    /// Live sessions of the user, newest first.
    pub async fn list_user_sessions(&self, user_id: &ObjectId) -> Result<Vec<Session>> {
        let now = Utc::now();
        let sessions = self.store.list_for_user(user_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|session| !session.is_expired_at(now))
            .collect())
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.store.delete_expired(Utc::now()).await?;
        if removed > 0 {
            log::info!("Cleaned up {} expired sessions", removed);
        }
        Ok(removed)
    }

    pub async fn active_session_count(&self) -> Result<u64> {
        self.store.count_active(Utc::now()).await
    }
}
