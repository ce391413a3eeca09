use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;

use protocol::OAuthProviderKind;

use super::memory::{
    InMemoryAuditStore, InMemoryOAuthAccountStore, InMemoryReferralStore, InMemorySessionStore,
    InMemoryTokenStore, InMemoryUserStore,
};
use super::models::{
    AuditFilter, AuditLogEntry, OAuthAccount, OneTimeToken, ReferralLink, Session, TokenKind,
    User, UserFilter, UserUpdate,
};
use super::mongo::MongoDbContext;
use crate::error::Result;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `EmailTaken` when the normalized email already exists.
    async fn insert(&self, user: &User) -> Result<ObjectId>;
    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Writes only the fields named in `update` and returns the stored user
    /// afterwards, or `None` when the user is gone.
    async fn update_fields(&self, id: &ObjectId, update: &UserUpdate) -> Result<Option<User>>;
    async fn delete(&self, id: &ObjectId) -> Result<bool>;
    /// Newest first, paged by `filter.page`/`filter.per_page`, plus the total
    /// number of matches.
    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, u64)>;
    async fn count(&self, filter: &UserFilter) -> Result<u64>;
    /// PRO users without an override whose trial has not ended yet.
    async fn count_trialing(&self, now: DateTime<Utc>) -> Result<u64>;
    /// Moves every PRO user without an override whose trial ended at or
    /// before `now` to BASIC, optionally limited to one user. Returns the ids
    /// this call downgraded.
    async fn expire_trials(
        &self,
        now: DateTime<Utc>,
        only: Option<&ObjectId>,
    ) -> Result<Vec<ObjectId>>;
    async fn count_by_referral(&self, slug: &str) -> Result<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<()>;
    async fn find(&self, id: &str) -> Result<Option<Session>>;
    async fn update_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn delete_for_user(&self, user_id: &ObjectId) -> Result<u64>;
    async fn delete_other_for_user(&self, user_id: &ObjectId, keep_id: &str) -> Result<u64>;
    /// Newest first.
    async fn list_for_user(&self, user_id: &ObjectId) -> Result<Vec<Session>>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait OAuthAccountStore: Send + Sync {
    /// Fails with `OAuthAccountInUse` when the provider identity is already
    /// linked.
    async fn insert(&self, account: &OAuthAccount) -> Result<()>;
    async fn find(
        &self,
        provider: OAuthProviderKind,
        provider_account_id: &str,
    ) -> Result<Option<OAuthAccount>>;
    async fn list_for_user(&self, user_id: &ObjectId) -> Result<Vec<OAuthAccount>>;
    async fn delete(&self, user_id: &ObjectId, provider: OAuthProviderKind) -> Result<bool>;
    async fn delete_for_user(&self, user_id: &ObjectId) -> Result<u64>;
}

#[async_trait]
pub trait OneTimeTokenStore: Send + Sync {
    async fn insert(&self, token: &OneTimeToken) -> Result<()>;
    /// Removes and returns the token in one step so it can be used once.
    async fn take(&self, kind: TokenKind, id: &str) -> Result<Option<OneTimeToken>>;
    /// Removes the user's tokens of `kind`, or all of them when `None`.
    async fn delete_for_user(&self, user_id: &ObjectId, kind: Option<TokenKind>) -> Result<u64>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;
    /// Newest first, with the total number of matches.
    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditLogEntry>, u64)>;
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Fails with `Conflict` when the slug is taken.
    async fn insert(&self, link: &ReferralLink) -> Result<ObjectId>;
    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<ReferralLink>>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<ReferralLink>>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<ReferralLink>>;
    async fn update(&self, link: &ReferralLink) -> Result<bool>;
    async fn delete(&self, id: &ObjectId) -> Result<bool>;
    async fn record_visit(&self, slug: &str) -> Result<()>;
}

/// Every store the application needs, behind trait objects so handlers do
/// not care whether MongoDB or the in-process backend is wired in.
#[derive(Clone)]
pub struct Database {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub oauth_accounts: Arc<dyn OAuthAccountStore>,
    pub tokens: Arc<dyn OneTimeTokenStore>,
    pub audit: Arc<dyn AuditStore>,
    pub referrals: Arc<dyn ReferralStore>,
}

impl Database {
    pub fn mongo(context: &MongoDbContext) -> Self {
        Self {
            users: Arc::new(context.users()),
            sessions: Arc::new(context.sessions()),
            oauth_accounts: Arc::new(context.oauth_accounts()),
            tokens: Arc::new(context.tokens()),
            audit: Arc::new(context.audit_logs()),
            referrals: Arc::new(context.referral_links()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryUserStore::default()),
            sessions: Arc::new(InMemorySessionStore::default()),
            oauth_accounts: Arc::new(InMemoryOAuthAccountStore::default()),
            tokens: Arc::new(InMemoryTokenStore::default()),
            audit: Arc::new(InMemoryAuditStore::default()),
            referrals: Arc::new(InMemoryReferralStore::default()),
        }
    }
}
