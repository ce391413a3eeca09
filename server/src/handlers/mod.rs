pub mod account;
pub mod admin;
pub mod auth;
pub mod health;
pub mod oauth;
pub mod referral;

use chrono::Utc;
use mongodb::bson::oid::ObjectId;

use protocol::{
    AuditLogView, ReferralLinkView, SessionView, UserView, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

use crate::db::{AuditLogEntry, ReferralLink, Session, User};
use crate::error::{AppError, Result};
use crate::plan::plan_status;
use crate::state::AppState;

pub use health::health_check;

pub(crate) fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw.trim()).map_err(|_| AppError::NotFound(what.to_string()))
}

/// Clamps 1-based paging input to sane bounds.
pub(crate) fn paging(page: Option<u64>, per_page: Option<u64>) -> (u64, u64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, per_page)
}

pub(crate) fn require_id(user: &User) -> Result<ObjectId> {
    user.id
        .ok_or_else(|| AppError::Internal("stored user without id".to_string()))
}

pub(crate) async fn user_view(state: &AppState, user: &User) -> Result<UserView> {
    let id = require_id(user)?;
    let oauth_providers = state
        .db
        .oauth_accounts
        .list_for_user(&id)
        .await?
        .into_iter()
        .map(|account| account.provider)
        .collect();

    Ok(UserView {
        id: id.to_hex(),
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        email_verified: user.is_email_verified(),
        has_password: user.has_password(),
        plan: plan_status(user, Utc::now()),
        oauth_providers,
        referred_by: user.referred_by.clone(),
        created_at: user.created_at,
        last_login: user.last_login,
    })
}

pub(crate) fn session_view(session: &Session, current_id: &str) -> SessionView {
    SessionView {
        id: session.id.clone(),
        current: session.id == current_id,
        created_at: session.created_at,
        expires_at: session.expires_at,
        ip_address: session.ip_address.clone(),
        user_agent: session.user_agent.clone(),
    }
}

pub(crate) fn audit_view(entry: AuditLogEntry) -> AuditLogView {
    AuditLogView {
        id: entry.id.map(|id| id.to_hex()).unwrap_or_default(),
        action: entry.action,
        actor_id: entry.actor_id.map(|id| id.to_hex()),
        target_user_id: entry.target_user_id.map(|id| id.to_hex()),
        ip_address: entry.ip_address,
        metadata: entry.metadata,
        created_at: entry.created_at,
    }
}

pub(crate) async fn referral_view(state: &AppState, link: ReferralLink) -> Result<ReferralLinkView> {
    let signups = state.db.users.count_by_referral(&link.slug).await?;
    Ok(ReferralLinkView {
        id: link.id.map(|id| id.to_hex()).unwrap_or_default(),
        slug: link.slug,
        name: link.name,
        trial_days: link.trial_days,
        active: link.active,
        visits: link.visits.max(0) as u64,
        signups,
        created_at: link.created_at,
    })
}
