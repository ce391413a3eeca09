use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document, Regex},
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use serde::de::DeserializeOwned;

use protocol::{OAuthProviderKind, Plan};

use super::models::{
    page_offset, AuditFilter, AuditLogEntry, OAuthAccount, OneTimeToken, ReferralLink, Session,
    TokenKind, User, UserChange, UserFilter, UserUpdate,
};
use super::repository::{
    AuditStore, OAuthAccountStore, OneTimeTokenStore, ReferralStore, SessionStore, UserStore,
};
use crate::error::{AppError, Result};

const USERS: &str = "users";
const SESSIONS: &str = "sessions";
const OAUTH_ACCOUNTS: &str = "oauth_accounts";
const TOKENS: &str = "one_time_tokens";
const AUDIT_LOGS: &str = "audit_logs";
const REFERRAL_LINKS: &str = "referral_links";

#[derive(Clone)]
pub struct MongoDbContext {
    db: mongodb::Database,
}

impl MongoDbContext {
    pub fn new(client: Client, database_name: &str) -> Self {
        Self {
            db: client.database(database_name),
        }
    }

    pub fn users(&self) -> UserRepository {
        UserRepository {
            collection: self.db.collection(USERS),
        }
    }

    pub fn sessions(&self) -> SessionRepository {
        SessionRepository {
            collection: self.db.collection(SESSIONS),
        }
    }

    pub fn oauth_accounts(&self) -> OAuthAccountRepository {
        OAuthAccountRepository {
            collection: self.db.collection(OAUTH_ACCOUNTS),
        }
    }

    pub fn tokens(&self) -> TokenRepository {
        TokenRepository {
            collection: self.db.collection(TOKENS),
        }
    }

    pub fn audit_logs(&self) -> AuditLogRepository {
        AuditLogRepository {
            collection: self.db.collection(AUDIT_LOGS),
        }
    }

    pub fn referral_links(&self) -> ReferralLinkRepository {
        ReferralLinkRepository {
            collection: self.db.collection(REFERRAL_LINKS),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub async fn init_indexes(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();
        // MongoDB drops these documents on its own once `expires_at` passes.
        let ttl = || {
            IndexOptions::builder()
                .expire_after(Duration::from_secs(0))
                .build()
        };

        self.create_index::<User>(USERS, doc! { "email": 1 }, Some(unique()))
            .await?;
        self.create_index::<User>(USERS, doc! { "referred_by": 1 }, None)
            .await?;
        self.create_index::<User>(USERS, doc! { "plan": 1, "trial_ends_at": 1 }, None)
            .await?;

        self.create_index::<Session>(SESSIONS, doc! { "user_id": 1 }, None)
            .await?;
        self.create_index::<Session>(SESSIONS, doc! { "expires_at": 1 }, Some(ttl()))
            .await?;

        self.create_index::<OAuthAccount>(
            OAUTH_ACCOUNTS,
            doc! { "provider": 1, "provider_account_id": 1 },
            Some(unique()),
        )
        .await?;
        self.create_index::<OAuthAccount>(OAUTH_ACCOUNTS, doc! { "user_id": 1 }, None)
            .await?;

        self.create_index::<OneTimeToken>(TOKENS, doc! { "user_id": 1, "kind": 1 }, None)
            .await?;
        self.create_index::<OneTimeToken>(TOKENS, doc! { "expires_at": 1 }, Some(ttl()))
            .await?;

        self.create_index::<AuditLogEntry>(AUDIT_LOGS, doc! { "target_user_id": 1 }, None)
            .await?;
        self.create_index::<AuditLogEntry>(AUDIT_LOGS, doc! { "action": 1 }, None)
            .await?;

        self.create_index::<ReferralLink>(REFERRAL_LINKS, doc! { "slug": 1 }, Some(unique()))
            .await?;

        log::info!("Database indexes created successfully");
        Ok(())
    }

    async fn create_index<T: Send + Sync>(
        &self,
        collection: &str,
        keys: Document,
        options: Option<IndexOptions>,
    ) -> Result<()> {
        let index = match options {
            Some(options) => IndexModel::builder().keys(keys).options(options).build(),
            None => IndexModel::builder().keys(keys).build(),
        };
        self.db
            .collection::<T>(collection)
            .create_index(index)
            .await?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == 11000
    )
}

fn inserted_object_id(id: mongodb::bson::Bson) -> Result<ObjectId> {
    id.as_object_id()
        .ok_or_else(|| AppError::Internal("insert did not return an ObjectId".to_string()))
}

async fn collect<T>(cursor: mongodb::Cursor<T>) -> Result<Vec<T>>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    Ok(cursor.try_collect().await?)
}

fn user_filter_document(filter: &UserFilter) -> Document {
    let mut query = Document::new();
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = Regex {
            pattern: regex::escape(search),
            options: "i".to_string(),
        };
        query.insert(
            "$or",
            vec![
                doc! { "email": pattern.clone() },
                doc! { "name": pattern },
            ],
        );
    }
    if let Some(plan) = filter.plan {
        query.insert("plan", plan.as_str());
    }
    if let Some(role) = filter.role {
        query.insert("role", role.as_str());
    }
    query
}

fn expired_trial_filter(now: DateTime<Utc>) -> Document {
    doc! {
        "plan": Plan::Pro.as_str(),
        "plan_override": false,
        "trial_ends_at": { "$lte": BsonDateTime::from_chrono(now) },
    }
}

fn user_update_document(update: &UserUpdate) -> Document {
    let mut set = Document::new();
    let mut unset = Document::new();
    for change in update.changes() {
        match change {
            UserChange::PasswordHash(Some(hash)) => {
                set.insert("password_hash", hash.as_str());
            }
            UserChange::PasswordHash(None) => {
                unset.insert("password_hash", "");
            }
            UserChange::EmailVerifiedAt(at) => {
                set.insert("email_verified_at", BsonDateTime::from_chrono(*at));
            }
            UserChange::Role(role) => {
                set.insert("role", role.as_str());
            }
            UserChange::Plan(plan) => {
                set.insert("plan", plan.as_str());
            }
            UserChange::PlanOverride(value) => {
                set.insert("plan_override", *value);
            }
            UserChange::TrialEndsAt(at) => {
                set.insert("trial_ends_at", BsonDateTime::from_chrono(*at));
            }
            UserChange::LastLogin(at) => {
                set.insert("last_login", BsonDateTime::from_chrono(*at));
            }
        }
    }

    let mut update = Document::new();
    if !set.is_empty() {
        update.insert("$set", set);
    }
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    update
}

#[derive(Clone)]
pub struct UserRepository {
    collection: Collection<User>,
}

#[async_trait]
impl UserStore for UserRepository {
    async fn insert(&self, user: &User) -> Result<ObjectId> {
        match self.collection.insert_one(user).await {
            Ok(result) => inserted_object_id(result.inserted_id),
            Err(err) if is_duplicate_key(&err) => Err(AppError::EmailTaken),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<User>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.collection.find_one(doc! { "email": email }).await?)
    }

    async fn update_fields(&self, id: &ObjectId, update: &UserUpdate) -> Result<Option<User>> {
        if update.is_empty() {
            return self.find_by_id(id).await;
        }
        Ok(self
            .collection
            .find_one_and_update(doc! { "_id": id }, user_update_document(update))
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, u64)> {
        let query = user_filter_document(filter);
        let total = self.collection.count_documents(query.clone()).await?;
        let cursor = self
            .collection
            .find(query)
            .sort(doc! { "_id": -1 })
            .skip(page_offset(filter.page, filter.per_page))
            .limit(filter.per_page as i64)
            .await?;
        Ok((collect(cursor).await?, total))
    }

    async fn count(&self, filter: &UserFilter) -> Result<u64> {
        Ok(self
            .collection
            .count_documents(user_filter_document(filter))
            .await?)
    }

    async fn count_trialing(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .collection
            .count_documents(doc! {
                "plan": Plan::Pro.as_str(),
                "plan_override": false,
                "trial_ends_at": { "$gt": BsonDateTime::from_chrono(now) },
            })
            .await?)
    }

    async fn expire_trials(
        &self,
        now: DateTime<Utc>,
        only: Option<&ObjectId>,
    ) -> Result<Vec<ObjectId>> {
        let mut filter = expired_trial_filter(now);
        if let Some(id) = only {
            filter.insert("_id", *id);
        }
        let cursor = self
            .collection
            .clone_with_type::<Document>()
            .find(filter.clone())
            .projection(doc! { "_id": 1 })
            .await?;
        let candidates: Vec<Document> = collect(cursor).await?;

        // Each downgrade re-checks the filter, so a user pinned in between
        // is left alone and not reported.
        let mut expired = Vec::new();
        for candidate in candidates {
            let Ok(id) = candidate.get_object_id("_id") else {
                continue;
            };
            let mut single = filter.clone();
            single.insert("_id", id);
            let result = self
                .collection
                .update_one(single, doc! { "$set": { "plan": Plan::Basic.as_str() } })
                .await?;
            if result.modified_count > 0 {
                expired.push(id);
            }
        }
        Ok(expired)
    }

    async fn count_by_referral(&self, slug: &str) -> Result<u64> {
        Ok(self
            .collection
            .count_documents(doc! { "referred_by": slug })
            .await?)
    }
}

#[derive(Clone)]
pub struct SessionRepository {
    collection: Collection<Session>,
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn insert(&self, session: &Session) -> Result<()> {
        self.collection.insert_one(session).await?;
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn update_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.collection
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "expires_at": BsonDateTime::from_chrono(expires_at) } },
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_for_user(&self, user_id: &ObjectId) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "user_id": user_id })
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_other_for_user(&self, user_id: &ObjectId, keep_id: &str) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "user_id": user_id, "_id": { "$ne": keep_id } })
            .await?;
        Ok(result.deleted_count)
    }

    async fn list_for_user(&self, user_id: &ObjectId) -> Result<Vec<Session>> {
        let cursor = self.collection.find(doc! { "user_id": user_id }).await?;
        let mut sessions = collect(cursor).await?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "expires_at": { "$lte": BsonDateTime::from_chrono(now) } })
            .await?;
        Ok(result.deleted_count)
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .collection
            .count_documents(doc! { "expires_at": { "$gt": BsonDateTime::from_chrono(now) } })
            .await?)
    }
}

#[derive(Clone)]
pub struct OAuthAccountRepository {
    collection: Collection<OAuthAccount>,
}

#[async_trait]
impl OAuthAccountStore for OAuthAccountRepository {
    async fn insert(&self, account: &OAuthAccount) -> Result<()> {
        match self.collection.insert_one(account).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(AppError::OAuthAccountInUse),
            Err(err) => Err(err.into()),
        }
    }

    async fn find(
        &self,
        provider: OAuthProviderKind,
        provider_account_id: &str,
    ) -> Result<Option<OAuthAccount>> {
        Ok(self
            .collection
            .find_one(doc! {
                "provider": provider.as_str(),
                "provider_account_id": provider_account_id,
            })
            .await?)
    }

    async fn list_for_user(&self, user_id: &ObjectId) -> Result<Vec<OAuthAccount>> {
        let cursor = self
            .collection
            .find(doc! { "user_id": user_id })
            .sort(doc! { "_id": 1 })
            .await?;
        collect(cursor).await
    }

    async fn delete(&self, user_id: &ObjectId, provider: OAuthProviderKind) -> Result<bool> {
        let result = self
            .collection
            .delete_one(doc! { "user_id": user_id, "provider": provider.as_str() })
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_for_user(&self, user_id: &ObjectId) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "user_id": user_id })
            .await?;
        Ok(result.deleted_count)
    }
}

#[derive(Clone)]
pub struct TokenRepository {
    collection: Collection<OneTimeToken>,
}

#[async_trait]
impl OneTimeTokenStore for TokenRepository {
    async fn insert(&self, token: &OneTimeToken) -> Result<()> {
        self.collection.insert_one(token).await?;
        Ok(())
    }

    async fn take(&self, kind: TokenKind, id: &str) -> Result<Option<OneTimeToken>> {
        Ok(self
            .collection
            .find_one_and_delete(doc! { "_id": id, "kind": kind.as_str() })
            .await?)
    }

    async fn delete_for_user(&self, user_id: &ObjectId, kind: Option<TokenKind>) -> Result<u64> {
        let mut query = doc! { "user_id": user_id };
        if let Some(kind) = kind {
            query.insert("kind", kind.as_str());
        }
        let result = self.collection.delete_many(query).await?;
        Ok(result.deleted_count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "expires_at": { "$lte": BsonDateTime::from_chrono(now) } })
            .await?;
        Ok(result.deleted_count)
    }
}

#[derive(Clone)]
pub struct AuditLogRepository {
    collection: Collection<AuditLogEntry>,
}

#[async_trait]
impl AuditStore for AuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.collection.insert_one(entry).await?;
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditLogEntry>, u64)> {
        let mut query = Document::new();
        if let Some(user_id) = filter.target_user_id {
            query.insert("target_user_id", user_id);
        }
        if let Some(action) = filter.action {
            query.insert("action", action.as_str());
        }

        let total = self.collection.count_documents(query.clone()).await?;
        let cursor = self
            .collection
            .find(query)
            .sort(doc! { "_id": -1 })
            .skip(page_offset(filter.page, filter.per_page))
            .limit(filter.per_page as i64)
            .await?;
        Ok((collect(cursor).await?, total))
    }
}

#[derive(Clone)]
pub struct ReferralLinkRepository {
    collection: Collection<ReferralLink>,
}

#[async_trait]
impl ReferralStore for ReferralLinkRepository {
    async fn insert(&self, link: &ReferralLink) -> Result<ObjectId> {
        match self.collection.insert_one(link).await {
            Ok(result) => inserted_object_id(result.inserted_id),
            Err(err) if is_duplicate_key(&err) => Err(AppError::Conflict(format!(
                "Referral slug '{}' is already in use",
                link.slug
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<ReferralLink>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<ReferralLink>> {
        Ok(self.collection.find_one(doc! { "slug": slug }).await?)
    }

    async fn list(&self) -> Result<Vec<ReferralLink>> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "_id": -1 })
            .await?;
        collect(cursor).await
    }

    async fn update(&self, link: &ReferralLink) -> Result<bool> {
        let Some(id) = link.id else {
            return Ok(false);
        };
        let result = self
            .collection
            .replace_one(doc! { "_id": id }, link)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn record_visit(&self, slug: &str) -> Result<()> {
        self.collection
            .update_one(doc! { "slug": slug }, doc! { "$inc": { "visits": 1_i64 } })
            .await?;
        Ok(())
    }
}
