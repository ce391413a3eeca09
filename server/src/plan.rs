//! Trial and plan bookkeeping. Trials elevate a user to PRO until
//! `trial_ends_at`; expiry is applied when the user is next loaded, and in
//! bulk before admin counts and listings.

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;

use protocol::{AuditAction, Plan, PlanStatus};

use crate::audit::{AuditEvent, AuditLogger};
use crate::db::{User, UserStore};
use crate::error::Result;

const SECS_PER_DAY: i64 = 24 * 3600;

/// `days == 0` means no trial at all.
pub fn start_trial(user: &mut User, days: u32, now: DateTime<Utc>) {
    if days == 0 {
        user.plan = Plan::Basic;
        user.trial_ends_at = None;
    } else {
        user.plan = Plan::Pro;
        user.trial_ends_at = Some(now + Duration::days(i64::from(days)));
    }
}

pub fn trial_expired(user: &User, now: DateTime<Utc>) -> bool {
    !user.plan_override
        && user.plan == Plan::Pro
        && user.trial_ends_at.is_some_and(|end| end <= now)
}

/// Downgrades an expired trial in place. Returns whether anything changed.
pub fn apply_trial_expiry(user: &mut User, now: DateTime<Utc>) -> bool {
    if trial_expired(user, now) {
        user.plan = Plan::Basic;
        true
    } else {
        false
    }
}

pub fn on_trial(user: &User, now: DateTime<Utc>) -> bool {
    !user.plan_override
        && user.plan == Plan::Pro
        && user.trial_ends_at.is_some_and(|end| end > now)
}

pub fn plan_status(user: &User, now: DateTime<Utc>) -> PlanStatus {
    let on_trial = on_trial(user, now);
    let trial_days_remaining = match user.trial_ends_at {
        Some(end) if on_trial => {
            let secs = (end - now).num_seconds().max(0);
            ((secs + SECS_PER_DAY - 1) / SECS_PER_DAY) as u32
        }
        _ => 0,
    };

    PlanStatus {
        plan: user.plan,
        on_trial,
        trial_ends_at: user.trial_ends_at,
        trial_days_remaining,
        plan_override: user.plan_override,
    }
}

/// Applies trial expiry to a loaded user and persists the downgrade. The
/// store re-checks the expiry condition, so a plan pinned by someone else in
/// the meantime wins and the fresh copy replaces `user`.
pub async fn sync_trial(
    users: &dyn UserStore,
    audit: &AuditLogger,
    user: &mut User,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(id) = user.id else {
        return Ok(());
    };
    if !trial_expired(user, now) {
        return Ok(());
    }

    let expired = users.expire_trials(now, Some(&id)).await?;
    if expired.contains(&id) {
        user.plan = Plan::Basic;
        record_expiry(audit, id).await;
    } else if let Some(fresh) = users.find_by_id(&id).await? {
        *user = fresh;
    }
    Ok(())
}

/// Downgrades every ended trial in one pass. Run before admin counts and
/// listings so they never report an ended trial as PRO.
pub async fn sweep_expired_trials(
    users: &dyn UserStore,
    audit: &AuditLogger,
    now: DateTime<Utc>,
) -> Result<usize> {
    let expired = users.expire_trials(now, None).await?;
    for id in &expired {
        record_expiry(audit, *id).await;
    }
    Ok(expired.len())
}

async fn record_expiry(audit: &AuditLogger, id: ObjectId) {
    log::info!("Trial expired for user {}", id.to_hex());
    audit
        .record(AuditEvent::new(AuditAction::TrialExpired).target(id))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{InMemoryAuditStore, InMemoryUserStore};
    use crate::db::{AuditFilter, UserUpdate};
    use std::sync::Arc;

    #[test]
    fn test_start_trial() {
        let now = Utc::now();
        let mut user = User::new("a@example.com", None);

        start_trial(&mut user, 14, now);
        assert_eq!(user.plan, Plan::Pro);
        assert_eq!(user.trial_ends_at, Some(now + Duration::days(14)));

        start_trial(&mut user, 0, now);
        assert_eq!(user.plan, Plan::Basic);
        assert!(user.trial_ends_at.is_none());
    }

    #[test]
    fn test_expiry_respects_override() {
        let now = Utc::now();
        let mut user = User::new("a@example.com", None);
        start_trial(&mut user, 1, now - Duration::days(2));
        assert!(trial_expired(&user, now));

        user.plan_override = true;
        assert!(!trial_expired(&user, now));
        assert!(!apply_trial_expiry(&mut user, now));
        assert_eq!(user.plan, Plan::Pro);

        user.plan_override = false;
        assert!(apply_trial_expiry(&mut user, now));
        assert_eq!(user.plan, Plan::Basic);
        assert!(!apply_trial_expiry(&mut user, now));
    }

    #[test]
    fn test_days_remaining_rounds_up() {
        let now = Utc::now();
        let mut user = User::new("a@example.com", None);
        user.plan = Plan::Pro;
        user.trial_ends_at = Some(now + Duration::hours(25));

        let status = plan_status(&user, now);
        assert!(status.on_trial);
        assert_eq!(status.trial_days_remaining, 2);

        user.trial_ends_at = Some(now + Duration::days(3));
        assert_eq!(plan_status(&user, now).trial_days_remaining, 3);

        user.plan_override = true;
        let status = plan_status(&user, now);
        assert!(!status.on_trial);
        assert_eq!(status.trial_days_remaining, 0);
        assert!(status.plan_override);
    }

    #[tokio::test]
    async fn test_sync_trial_persists_and_audits() {
        let users = InMemoryUserStore::default();
        let audit = AuditLogger::new(Arc::new(InMemoryAuditStore::default()));
        let now = Utc::now();

        let mut user = User::new("a@example.com", None);
        start_trial(&mut user, 1, now - Duration::days(3));
        let id = users.insert(&user).await.unwrap();
        user.id = Some(id);

        sync_trial(&users, &audit, &mut user, now).await.unwrap();
        assert_eq!(user.plan, Plan::Basic);
        let stored = users.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.plan, Plan::Basic);

        let filter = AuditFilter {
            action: Some(AuditAction::TrialExpired),
            page: 1,
            per_page: 10,
            ..AuditFilter::default()
        };
        assert_eq!(audit.list(&filter).await.unwrap().1, 1);

        sync_trial(&users, &audit, &mut user, now).await.unwrap();
        assert_eq!(audit.list(&filter).await.unwrap().1, 1);
    }

    #[tokio::test]
    async fn test_sync_trial_yields_to_concurrent_override() {
        let users = InMemoryUserStore::default();
        let audit = AuditLogger::new(Arc::new(InMemoryAuditStore::default()));
        let now = Utc::now();

        let mut user = User::new("a@example.com", None);
        start_trial(&mut user, 1, now - Duration::days(3));
        let id = users.insert(&user).await.unwrap();
        user.id = Some(id);

        // An admin pins the plan after this copy was loaded.
        users
            .update_fields(&id, &UserUpdate::new().plan_override(true))
            .await
            .unwrap();

        sync_trial(&users, &audit, &mut user, now).await.unwrap();
        assert_eq!(user.plan, Plan::Pro);
        assert!(user.plan_override);
        let stored = users.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.plan, Plan::Pro);
    }

    #[tokio::test]
    async fn test_sweep_downgrades_and_audits_each_user() {
        let users = InMemoryUserStore::default();
        let audit = AuditLogger::new(Arc::new(InMemoryAuditStore::default()));
        let now = Utc::now();

        let started = [
            ("a@example.com", 3),
            ("b@example.com", 5),
            ("c@example.com", -5),
        ];
        for (email, days_ago) in started {
            let mut user = User::new(email, None);
            start_trial(&mut user, 1, now - Duration::days(days_ago));
            users.insert(&user).await.unwrap();
        }

        assert_eq!(sweep_expired_trials(&users, &audit, now).await.unwrap(), 2);
        assert_eq!(sweep_expired_trials(&users, &audit, now).await.unwrap(), 0);
        assert_eq!(users.count_trialing(now).await.unwrap(), 1);

        let filter = AuditFilter {
            action: Some(AuditAction::TrialExpired),
            page: 1,
            per_page: 10,
            ..AuditFilter::default()
        };
        assert_eq!(audit.list(&filter).await.unwrap().1, 2);
    }
}
