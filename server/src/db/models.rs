use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::{
    chrono_datetime_as_bson_datetime as bson_datetime,
    chrono_datetime_as_bson_datetime_optional as bson_datetime_optional,
};
use serde::{Deserialize, Serialize};

use protocol::{AuditAction, OAuthProviderKind, Plan, Role};

/// Lower-cases and trims an email so lookups and the unique index agree.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Absent for accounts that only ever signed in through OAuth.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default, with = "bson_datetime_optional")]
    pub email_verified_at: Option<DateTime<Utc>>,
    pub role: Role,
    pub plan: Plan,
    /// Set when an administrator pinned the plan; trial expiry skips the user.
    #[serde(default)]
    pub plan_override: bool,
    #[serde(default, with = "bson_datetime_optional")]
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Slug of the referral link that brought the user in.
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(with = "bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "bson_datetime_optional")]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(email: &str, name: Option<String>) -> Self {
        Self {
            id: None,
            email: normalize_email(email),
            name: name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            password_hash: None,
            email_verified_at: None,
            role: Role::User,
            plan: Plan::Basic,
            plan_override: false,
            trial_ends_at: None,
            referred_by: None,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }

    pub fn update_last_login(&mut self) {
        self.last_login = Some(Utc::now());
    }
}

/// One field-level change to a stored user.
#[derive(Debug, Clone, PartialEq)]
pub enum UserChange {
    /// `None` removes the password, leaving OAuth as the only way in.
    PasswordHash(Option<String>),
    EmailVerifiedAt(DateTime<Utc>),
    Role(Role),
    Plan(Plan),
    PlanOverride(bool),
    TrialEndsAt(DateTime<Utc>),
    LastLogin(DateTime<Utc>),
}

/// Targeted update applied by `UserStore::update_fields`. Only the listed
/// fields are written, so concurrent changes to other fields survive.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    changes: Vec<UserChange>,
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, change: UserChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn password_hash(self, hash: Option<String>) -> Self {
        self.with(UserChange::PasswordHash(hash))
    }

    pub fn email_verified_at(self, at: DateTime<Utc>) -> Self {
        self.with(UserChange::EmailVerifiedAt(at))
    }

    pub fn role(self, role: Role) -> Self {
        self.with(UserChange::Role(role))
    }

    pub fn plan(self, plan: Plan) -> Self {
        self.with(UserChange::Plan(plan))
    }

    pub fn plan_override(self, plan_override: bool) -> Self {
        self.with(UserChange::PlanOverride(plan_override))
    }

    pub fn trial_ends_at(self, at: DateTime<Utc>) -> Self {
        self.with(UserChange::TrialEndsAt(at))
    }

    pub fn last_login(self, at: DateTime<Utc>) -> Self {
        self.with(UserChange::LastLogin(at))
    }

    pub fn changes(&self) -> &[UserChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn apply_to(&self, user: &mut User) {
        for change in &self.changes {
            match change {
                UserChange::PasswordHash(hash) => user.password_hash = hash.clone(),
                UserChange::EmailVerifiedAt(at) => user.email_verified_at = Some(*at),
                UserChange::Role(role) => user.role = *role,
                UserChange::Plan(plan) => user.plan = *plan,
                UserChange::PlanOverride(value) => user.plan_override = *value,
                UserChange::TrialEndsAt(at) => user.trial_ends_at = Some(*at),
                UserChange::LastLogin(at) => user.last_login = Some(*at),
            }
        }
    }
}

/// Server-side session. The id is the hash of the cookie token, never the
/// token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: ObjectId,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    PasswordReset,
    EmailVerification,
}

impl TokenKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TokenKind::PasswordReset => "password_reset",
            TokenKind::EmailVerification => "email_verification",
        }
    }
}

/// Single-use token mailed to the user. Stored by hash like sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimeToken {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: ObjectId,
    pub kind: TokenKind,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAccount {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub provider: OAuthProviderKind,
    pub provider_account_id: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthAccount {
    pub fn new(user_id: ObjectId, provider: OAuthProviderKind, provider_account_id: String) -> Self {
        Self {
            id: None,
            user_id,
            provider,
            provider_account_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub action: AuditAction,
    #[serde(default)]
    pub actor_id: Option<ObjectId>,
    #[serde(default)]
    pub target_user_id: Option<ObjectId>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralLink {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub slug: String,
    pub name: String,
    pub trial_days: u32,
    pub active: bool,
    #[serde(default)]
    pub visits: i64,
    #[serde(default)]
    pub created_by: Option<ObjectId>,
    pub created_at: DateTime<Utc>,
}

impl ReferralLink {
    pub fn new(slug: String, name: String, trial_days: u32, created_by: Option<ObjectId>) -> Self {
        Self {
            id: None,
            slug,
            name,
            trial_days,
            active: true,
            visits: 0,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// Filters for the admin user list. `page` is 1-based.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub plan: Option<Plan>,
    pub role: Option<Role>,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub target_user_id: Option<ObjectId>,
    pub action: Option<AuditAction>,
    pub page: u64,
    pub per_page: u64,
}

/// Converts a 1-based page into a document offset.
pub fn page_offset(page: u64, per_page: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(per_page)
}
