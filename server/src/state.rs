use std::sync::Arc;

use actix_web::HttpRequest;

use crate::audit::AuditLogger;
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::mailer::Mailer;
use crate::middleware::RateLimiter;
use crate::oauth::{state::STATE_TTL, OAuthProviders, OAuthStateSigner};
use crate::password::PasswordHasher;
use crate::request;
use crate::session::SessionManager;
use crate::tokens::OneTimeTokens;

/// Everything handlers and middleware share, registered once as
/// `web::Data<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub sessions: SessionManager,
    pub tokens: OneTimeTokens,
    pub audit: AuditLogger,
    pub passwords: PasswordHasher,
    pub mailer: Arc<dyn Mailer>,
    pub oauth: OAuthProviders,
    pub oauth_state: OAuthStateSigner,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Database,
        mailer: Arc<dyn Mailer>,
        oauth: OAuthProviders,
    ) -> Result<Self> {
        let oauth_state = OAuthStateSigner::new(config.auth.secret.as_bytes(), STATE_TTL)
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            sessions: SessionManager::new(db.sessions.clone(), config.session_ttl()),
            tokens: OneTimeTokens::new(
                db.tokens.clone(),
                config.password_reset_ttl(),
                config.email_verification_ttl(),
            ),
            audit: AuditLogger::new(db.audit.clone()),
            passwords: PasswordHasher::new(config.auth.bcrypt_cost),
            rate_limiter: RateLimiter::from_settings(&config.rate_limit),
            mailer,
            oauth,
            oauth_state,
            db,
            config: Arc::new(config),
        })
    }

    pub fn client_ip(&self, req: &HttpRequest) -> Option<String> {
        request::client_ip(req, self.config.server.trust_forwarded_for)
    }
}
