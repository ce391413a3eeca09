//! In-process stores used by tests and `memory://` development runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mongodb::bson::oid::ObjectId;

use protocol::OAuthProviderKind;

use super::models::{
    page_offset, AuditFilter, AuditLogEntry, OAuthAccount, OneTimeToken, ReferralLink, Session,
    TokenKind, User, UserFilter, UserUpdate,
};
use super::repository::{
    AuditStore, OAuthAccountStore, OneTimeTokenStore, ReferralStore, SessionStore, UserStore,
};
use crate::error::{AppError, Result};
use crate::plan::apply_trial_expiry;

fn paginate<T>(mut items: Vec<T>, page: u64, per_page: u64) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let offset = page_offset(page, per_page).min(total) as usize;
    let page_items = items
        .drain(offset..)
        .take(per_page as usize)
        .collect();
    (page_items, total)
}

fn matches_user(user: &User, filter: &UserFilter) -> bool {
    if let Some(search) = filter
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
    {
        let in_email = user.email.contains(&search);
        let in_name = user
            .name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(&search));
        if !in_email && !in_name {
            return false;
        }
    }
    filter.plan.map_or(true, |plan| user.plan == plan)
        && filter.role.map_or(true, |role| user.role == role)
}

#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<DashMap<ObjectId, User>>,
    // email -> user id
    emails: Arc<DashMap<String, ObjectId>>,
}

impl InMemoryUserStore {
    fn filtered(&self, filter: &UserFilter) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|entry| matches_user(entry.value(), filter))
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| b.id.cmp(&a.id));
        users
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: &User) -> Result<ObjectId> {
        let id = user.id.unwrap_or_else(ObjectId::new);
        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(AppError::EmailTaken),
            Entry::Vacant(slot) => {
                slot.insert(id);
                let mut stored = user.clone();
                stored.id = Some(id);
                self.users.insert(id, stored);
                Ok(id)
            }
        }
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<User>> {
        Ok(self.users.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let Some(id) = self.emails.get(email).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        self.find_by_id(&id).await
    }

    async fn update_fields(&self, id: &ObjectId, update: &UserUpdate) -> Result<Option<User>> {
        Ok(self.users.get_mut(id).map(|mut stored| {
            update.apply_to(&mut stored);
            stored.clone()
        }))
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        match self.users.remove(id) {
            Some((_, user)) => {
                self.emails.remove(&user.email);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, u64)> {
        Ok(paginate(self.filtered(filter), filter.page, filter.per_page))
    }

    async fn count(&self, filter: &UserFilter) -> Result<u64> {
        Ok(self
            .users
            .iter()
            .filter(|entry| matches_user(entry.value(), filter))
            .count() as u64)
    }

    async fn count_trialing(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .users
            .iter()
            .filter(|entry| {
                let user = entry.value();
                user.plan == protocol::Plan::Pro
                    && !user.plan_override
                    && user.trial_ends_at.is_some_and(|end| end > now)
            })
            .count() as u64)
    }

    async fn expire_trials(
        &self,
        now: DateTime<Utc>,
        only: Option<&ObjectId>,
    ) -> Result<Vec<ObjectId>> {
        let mut expired = Vec::new();
        for mut entry in self.users.iter_mut() {
            if only.is_some_and(|id| id != entry.key()) {
                continue;
            }
            if apply_trial_expiry(entry.value_mut(), now) {
                expired.push(*entry.key());
            }
        }
        Ok(expired)
    }

    async fn count_by_referral(&self, slug: &str) -> Result<u64> {
        Ok(self
            .users
            .iter()
            .filter(|entry| entry.value().referred_by.as_deref() == Some(slug))
            .count() as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.expires_at = expires_at;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.remove(id).is_some())
    }

    async fn delete_for_user(&self, user_id: &ObjectId) -> Result<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.user_id != *user_id);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn delete_other_for_user(&self, user_id: &ObjectId, keep_id: &str) -> Result<u64> {
        let before = self.sessions.len();
        self.sessions
            .retain(|id, session| session.user_id != *user_id || id == keep_id);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn list_for_user(&self, user_id: &ObjectId) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().user_id == *user_id)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired_at(now));
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_expired_at(now))
            .count() as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryOAuthAccountStore {
    accounts: Arc<DashMap<(OAuthProviderKind, String), OAuthAccount>>,
}

#[async_trait]
impl OAuthAccountStore for InMemoryOAuthAccountStore {
    async fn insert(&self, account: &OAuthAccount) -> Result<()> {
        let key = (account.provider, account.provider_account_id.clone());
        match self.accounts.entry(key) {
            Entry::Occupied(_) => Err(AppError::OAuthAccountInUse),
            Entry::Vacant(slot) => {
                let mut stored = account.clone();
                stored.id = Some(stored.id.unwrap_or_else(ObjectId::new));
                slot.insert(stored);
                Ok(())
            }
        }
    }

    async fn find(
        &self,
        provider: OAuthProviderKind,
        provider_account_id: &str,
    ) -> Result<Option<OAuthAccount>> {
        Ok(self
            .accounts
            .get(&(provider, provider_account_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn list_for_user(&self, user_id: &ObjectId) -> Result<Vec<OAuthAccount>> {
        let mut accounts: Vec<OAuthAccount> = self
            .accounts
            .iter()
            .filter(|entry| entry.value().user_id == *user_id)
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn delete(&self, user_id: &ObjectId, provider: OAuthProviderKind) -> Result<bool> {
        let before = self.accounts.len();
        self.accounts.retain(|(kind, _), account| {
            !(account.user_id == *user_id && *kind == provider)
        });
        Ok(self.accounts.len() < before)
    }

    async fn delete_for_user(&self, user_id: &ObjectId) -> Result<u64> {
        let before = self.accounts.len();
        self.accounts.retain(|_, account| account.user_id != *user_id);
        Ok(before.saturating_sub(self.accounts.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    tokens: Arc<DashMap<String, OneTimeToken>>,
}

#[async_trait]
impl OneTimeTokenStore for InMemoryTokenStore {
    async fn insert(&self, token: &OneTimeToken) -> Result<()> {
        self.tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn take(&self, kind: TokenKind, id: &str) -> Result<Option<OneTimeToken>> {
        Ok(self
            .tokens
            .remove_if(id, |_, token| token.kind == kind)
            .map(|(_, token)| token))
    }

    async fn delete_for_user(&self, user_id: &ObjectId, kind: Option<TokenKind>) -> Result<u64> {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| {
            token.user_id != *user_id || kind.is_some_and(|kind| token.kind != kind)
        });
        Ok(before.saturating_sub(self.tokens.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| token.expires_at > now);
        Ok(before.saturating_sub(self.tokens.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    entries: Arc<DashMap<ObjectId, AuditLogEntry>>,
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        let id = entry.id.unwrap_or_else(ObjectId::new);
        let mut stored = entry.clone();
        stored.id = Some(id);
        self.entries.insert(id, stored);
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditLogEntry>, u64)> {
        let mut entries: Vec<AuditLogEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|entry| {
                filter
                    .target_user_id
                    .map_or(true, |id| entry.target_user_id == Some(id))
                    && filter.action.map_or(true, |action| entry.action == action)
            })
            .collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(paginate(entries, filter.page, filter.per_page))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryReferralStore {
    links: Arc<DashMap<ObjectId, ReferralLink>>,
    // slug -> link id
    slugs: Arc<DashMap<String, ObjectId>>,
}

#[async_trait]
impl ReferralStore for InMemoryReferralStore {
    async fn insert(&self, link: &ReferralLink) -> Result<ObjectId> {
        let id = link.id.unwrap_or_else(ObjectId::new);
        match self.slugs.entry(link.slug.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "Referral slug '{}' is already in use",
                link.slug
            ))),
            Entry::Vacant(slot) => {
                slot.insert(id);
                let mut stored = link.clone();
                stored.id = Some(id);
                self.links.insert(id, stored);
                Ok(id)
            }
        }
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<ReferralLink>> {
        Ok(self.links.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<ReferralLink>> {
        let Some(id) = self.slugs.get(slug).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        self.find_by_id(&id).await
    }

    async fn list(&self) -> Result<Vec<ReferralLink>> {
        let mut links: Vec<ReferralLink> = self
            .links
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        links.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(links)
    }

    async fn update(&self, link: &ReferralLink) -> Result<bool> {
        let Some(id) = link.id else {
            return Ok(false);
        };
        match self.links.get_mut(&id) {
            Some(mut stored) => {
                *stored = link.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        match self.links.remove(id) {
            Some((_, link)) => {
                self.slugs.remove(&link.slug);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_visit(&self, slug: &str) -> Result<()> {
        let Some(id) = self.slugs.get(slug).map(|entry| *entry.value()) else {
            return Ok(());
        };
        if let Some(mut link) = self.links.get_mut(&id) {
            link.visits += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use protocol::{Plan, Role};

    fn session(user_id: ObjectId, id: &str, expires_at: DateTime<Utc>) -> Session {
        Session {
            id: id.to_string(),
            user_id,
            expires_at,
            created_at: Utc::now(),
            ip_address: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = InMemoryUserStore::default();
        store.insert(&User::new("a@example.com", None)).await.unwrap();

        let result = store.insert(&User::new("A@Example.com", None)).await;
        assert!(matches!(result, Err(AppError::EmailTaken)));
    }

    #[tokio::test]
    async fn test_delete_frees_email() {
        let store = InMemoryUserStore::default();
        let id = store.insert(&User::new("a@example.com", None)).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(store.find_by_email("a@example.com").await.unwrap().is_none());
        store.insert(&User::new("a@example.com", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_user_list_filters_and_pages() {
        let store = InMemoryUserStore::default();
        for i in 0..5 {
            let mut user = User::new(&format!("user{i}@example.com"), None);
            if i % 2 == 0 {
                user.plan = Plan::Pro;
            }
            store.insert(&user).await.unwrap();
        }
        let mut admin = User::new("boss@corp.io", Some("Alice Boss".to_string()));
        admin.role = Role::Admin;
        store.insert(&admin).await.unwrap();

        let filter = UserFilter {
            plan: Some(Plan::Pro),
            page: 1,
            per_page: 2,
            ..UserFilter::default()
        };
        let (page, total) = store.list(&filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].email, "user4@example.com");

        let filter = UserFilter {
            search: Some("alice".to_string()),
            page: 1,
            per_page: 10,
            ..UserFilter::default()
        };
        let (page, total) = store.list(&filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].role, Role::Admin);
    }

    #[tokio::test]
    async fn test_update_fields_keeps_other_changes() {
        let store = InMemoryUserStore::default();
        let id = store.insert(&User::new("a@example.com", None)).await.unwrap();

        // A stale copy is read, then another writer changes the plan.
        let stale = store.find_by_id(&id).await.unwrap().unwrap();
        store
            .update_fields(&id, &UserUpdate::new().plan(Plan::Pro).plan_override(true))
            .await
            .unwrap();

        let login_at = Utc::now();
        let updated = store
            .update_fields(&id, &UserUpdate::new().last_login(login_at))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.plan, Plan::Basic);
        assert_eq!(updated.plan, Plan::Pro);
        assert!(updated.plan_override);
        assert_eq!(updated.last_login, Some(login_at));

        let missing = store
            .update_fields(&ObjectId::new(), &UserUpdate::new().role(Role::Admin))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_expire_trials_skips_overrides_and_running_trials() {
        let store = InMemoryUserStore::default();
        let now = Utc::now();

        let mut ended = User::new("ended@example.com", None);
        ended.plan = Plan::Pro;
        ended.trial_ends_at = Some(now - Duration::hours(1));
        let ended_id = store.insert(&ended).await.unwrap();

        let mut pinned = ended.clone();
        pinned.email = "pinned@example.com".to_string();
        pinned.plan_override = true;
        let pinned_id = store.insert(&pinned).await.unwrap();

        let mut running = ended.clone();
        running.email = "running@example.com".to_string();
        running.trial_ends_at = Some(now + Duration::days(2));
        store.insert(&running).await.unwrap();

        assert!(store.expire_trials(now, Some(&pinned_id)).await.unwrap().is_empty());
        assert_eq!(store.count_trialing(now).await.unwrap(), 1);

        let expired = store.expire_trials(now, None).await.unwrap();
        assert_eq!(expired, vec![ended_id]);
        assert!(store.expire_trials(now, None).await.unwrap().is_empty());

        let pro = UserFilter {
            plan: Some(Plan::Pro),
            ..UserFilter::default()
        };
        assert_eq!(store.count(&pro).await.unwrap(), 2);
        let stored = store.find_by_id(&ended_id).await.unwrap().unwrap();
        assert_eq!(stored.plan, Plan::Basic);
    }

    #[tokio::test]
    async fn test_delete_other_sessions_keeps_current() {
        let store = InMemorySessionStore::default();
        let user = ObjectId::new();
        let other_user = ObjectId::new();
        let expires = Utc::now() + Duration::hours(1);
        store.insert(&session(user, "a", expires)).await.unwrap();
        store.insert(&session(user, "b", expires)).await.unwrap();
        store.insert(&session(other_user, "c", expires)).await.unwrap();

        assert_eq!(store.delete_other_for_user(&user, "a").await.unwrap(), 1);
        assert!(store.find("a").await.unwrap().is_some());
        assert!(store.find("b").await.unwrap().is_none());
        assert!(store.find("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_expired_sessions() {
        let store = InMemorySessionStore::default();
        let user = ObjectId::new();
        let now = Utc::now();
        store
            .insert(&session(user, "old", now - Duration::seconds(1)))
            .await
            .unwrap();
        store
            .insert(&session(user, "new", now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.count_active(now).await.unwrap(), 1);
        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert!(store.find("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_token_take_checks_kind() {
        let store = InMemoryTokenStore::default();
        let token = OneTimeToken {
            id: "hash".to_string(),
            user_id: ObjectId::new(),
            kind: TokenKind::PasswordReset,
            expires_at: Utc::now() + Duration::hours(1),
            created_at: Utc::now(),
        };
        store.insert(&token).await.unwrap();

        assert!(store
            .take(TokenKind::EmailVerification, "hash")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .take(TokenKind::PasswordReset, "hash")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .take(TokenKind::PasswordReset, "hash")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_oauth_identity_is_unique() {
        let store = InMemoryOAuthAccountStore::default();
        let account = OAuthAccount::new(ObjectId::new(), OAuthProviderKind::GitHub, "42".into());
        store.insert(&account).await.unwrap();

        let other = OAuthAccount::new(ObjectId::new(), OAuthProviderKind::GitHub, "42".into());
        assert!(matches!(
            store.insert(&other).await,
            Err(AppError::OAuthAccountInUse)
        ));

        let google = OAuthAccount::new(ObjectId::new(), OAuthProviderKind::Google, "42".into());
        store.insert(&google).await.unwrap();
    }

    #[tokio::test]
    async fn test_referral_visits_and_slug_conflict() {
        let store = InMemoryReferralStore::default();
        let link = ReferralLink::new("launch".into(), "Launch".into(), 30, None);
        store.insert(&link).await.unwrap();
        store.record_visit("launch").await.unwrap();
        store.record_visit("launch").await.unwrap();
        store.record_visit("missing").await.unwrap();

        let stored = store.find_by_slug("launch").await.unwrap().unwrap();
        assert_eq!(stored.visits, 2);

        let duplicate = ReferralLink::new("launch".into(), "Again".into(), 7, None);
        assert!(matches!(
            store.insert(&duplicate).await,
            Err(AppError::Conflict(_))
        ));
    }
}
