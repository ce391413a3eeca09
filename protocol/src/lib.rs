//! JSON contract shared between the Launchpad server and its clients.
//!
//! Every request and response body exchanged over HTTP is defined here so the
//! admin console, the marketing site and integration tests all agree on field
//! names and enum spellings.

pub mod account;
pub mod api;
pub mod audit;

pub use account::{OAuthProviderKind, ParseEnumError, Plan, Role};
pub use api::{
    AdminStatsResponse, AuditLogListResponse, AuditLogQuery, AuditLogView, AuthResponse,
    ChangePasswordRequest, CreateReferralLinkRequest, ExtendTrialRequest, ForgotPasswordRequest,
    LoginRequest, MessageResponse, PlanStatus, ReferralLinkListResponse, ReferralLinkView,
    ResetPasswordRequest, SessionListResponse, SessionView, SignupRequest, UpdatePlanRequest,
    UpdateReferralLinkRequest, UpdateRoleRequest, UserListQuery, UserListResponse, UserView,
    VerifyEmailRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use audit::AuditAction;

/// Returns the protocol crate version string.
pub fn protocol_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
