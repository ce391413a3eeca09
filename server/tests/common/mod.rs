#![allow(dead_code)]

use std::sync::Arc;

use actix_web::{cookie::Cookie, dev::ServiceResponse, test::TestRequest};
use serde_json::json;

use protocol::AuditAction;

use launchpad::config::AppConfig;
use launchpad::db::{AuditFilter, Database};
use launchpad::mailer::MemoryMailer;
use launchpad::oauth::OAuthProviders;
use launchpad::state::AppState;

pub const SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const PASSWORD: &str = "launch-pad-42";
pub const ADMIN_EMAIL: &str = "admin@example.com";

pub fn test_config() -> AppConfig {
    AppConfig::from_toml_str(&format!(
        r#"
[server]
base_url = "https://app.example.com"

[auth]
secret = "{SECRET}"
bcrypt_cost = 4

[rate_limit]
max_requests = 1000
window_secs = 60

[admin]
emails = ["{ADMIN_EMAIL}"]
"#
    ))
    .expect("test config")
}

pub struct TestContext {
    pub state: AppState,
    pub mailer: MemoryMailer,
}

pub fn context_with(config: AppConfig, oauth: OAuthProviders) -> TestContext {
    let mailer = MemoryMailer::new();
    let state = AppState::new(
        config,
        Database::in_memory(),
        Arc::new(mailer.clone()),
        oauth,
    )
    .expect("app state");
    TestContext { state, mailer }
}

pub fn context() -> TestContext {
    context_with(test_config(), OAuthProviders::empty())
}

pub fn signup(email: &str) -> TestRequest {
    TestRequest::post()
        .uri("/auth/signup")
        .set_json(json!({ "email": email, "password": PASSWORD }))
}

pub fn login(email: &str, password: &str) -> TestRequest {
    TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({ "email": email, "password": password }))
}

pub fn response_cookie<B>(resp: &ServiceResponse<B>, name: &str) -> Option<Cookie<'static>> {
    resp.response()
        .cookies()
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.into_owned())
}

pub fn session_cookie<B>(resp: &ServiceResponse<B>) -> Cookie<'static> {
    response_cookie(resp, "session").expect("session cookie")
}

pub fn location<B>(resp: &ServiceResponse<B>) -> String {
    resp.headers()
        .get("location")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Actions in the audit log, newest first.
pub async fn audit_actions(state: &AppState) -> Vec<AuditAction> {
    let filter = AuditFilter {
        page: 1,
        per_page: 100,
        ..AuditFilter::default()
    };
    let (entries, _) = state.audit.list(&filter).await.expect("audit list");
    entries.into_iter().map(|entry| entry.action).collect()
}
