use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::account::ParseEnumError;

/// Security and account relevant actions recorded in the audit log.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UserSignup,
    UserLogin,
    LoginFailed,
    UserLogout,
    PasswordResetRequested,
    PasswordReset,
    PasswordChanged,
    EmailVerified,
    OauthLinked,
    OauthUnlinked,
    SessionsRevoked,
    TrialExpired,
    PlanChanged,
    PlanOverrideCleared,
    TrialExtended,
    RoleChanged,
    UserDeleted,
    ReferralLinkCreated,
    ReferralLinkUpdated,
    ReferralLinkDeleted,
}

impl AuditAction {
    pub const ALL: [AuditAction; 20] = [
        AuditAction::UserSignup,
        AuditAction::UserLogin,
        AuditAction::LoginFailed,
        AuditAction::UserLogout,
        AuditAction::PasswordResetRequested,
        AuditAction::PasswordReset,
        AuditAction::PasswordChanged,
        AuditAction::EmailVerified,
        AuditAction::OauthLinked,
        AuditAction::OauthUnlinked,
        AuditAction::SessionsRevoked,
        AuditAction::TrialExpired,
        AuditAction::PlanChanged,
        AuditAction::PlanOverrideCleared,
        AuditAction::TrialExtended,
        AuditAction::RoleChanged,
        AuditAction::UserDeleted,
        AuditAction::ReferralLinkCreated,
        AuditAction::ReferralLinkUpdated,
        AuditAction::ReferralLinkDeleted,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AuditAction::UserSignup => "USER_SIGNUP",
            AuditAction::UserLogin => "USER_LOGIN",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::UserLogout => "USER_LOGOUT",
            AuditAction::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            AuditAction::PasswordReset => "PASSWORD_RESET",
            AuditAction::PasswordChanged => "PASSWORD_CHANGED",
            AuditAction::EmailVerified => "EMAIL_VERIFIED",
            AuditAction::OauthLinked => "OAUTH_LINKED",
            AuditAction::OauthUnlinked => "OAUTH_UNLINKED",
            AuditAction::SessionsRevoked => "SESSIONS_REVOKED",
            AuditAction::TrialExpired => "TRIAL_EXPIRED",
            AuditAction::PlanChanged => "PLAN_CHANGED",
            AuditAction::PlanOverrideCleared => "PLAN_OVERRIDE_CLEARED",
            AuditAction::TrialExtended => "TRIAL_EXTENDED",
            AuditAction::RoleChanged => "ROLE_CHANGED",
            AuditAction::UserDeleted => "USER_DELETED",
            AuditAction::ReferralLinkCreated => "REFERRAL_LINK_CREATED",
            AuditAction::ReferralLinkUpdated => "REFERRAL_LINK_UPDATED",
            AuditAction::ReferralLinkDeleted => "REFERRAL_LINK_DELETED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        AuditAction::ALL
            .into_iter()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| ParseEnumError {
                kind: "audit action",
                value: s.to_string(),
            })
    }
}
