use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

use protocol::OAuthProviderKind;

use crate::error::{AppError, Result};

/// Prefix of environment variables overriding file settings, e.g.
/// `LAUNCHPAD__DATABASE__URI`.
pub const ENV_PREFIX: &str = "LAUNCHPAD";

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub trial: TrialSettings,
    #[serde(default)]
    pub referral: ReferralSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub admin: AdminSettings,
    #[serde(default)]
    pub oauth: OAuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Public origin used in emailed links and default OAuth callbacks.
    pub base_url: String,
    /// Only enable behind a proxy that overwrites `X-Forwarded-For`.
    pub trust_forwarded_for: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// MongoDB connection string, or `memory://` for the in-process store.
    pub uri: String,
    pub name: String,
}

impl DatabaseSettings {
    pub fn is_in_memory(&self) -> bool {
        self.uri.trim().starts_with("memory://")
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            name: "launchpad".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub expiry_hours: u64,
    pub cookie_name: String,
    pub secure_cookies: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            expiry_hours: 24 * 30,
            cookie_name: "session".to_string(),
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC key for OAuth state tokens. Must be at least 32 bytes.
    pub secret: String,
    pub bcrypt_cost: u32,
    pub password_reset_ttl_minutes: u64,
    pub email_verification_ttl_hours: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            password_reset_ttl_minutes: 60,
            email_verification_ttl_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrialSettings {
    pub default_days: u32,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self { default_days: 14 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferralSettings {
    pub cookie_name: String,
    pub cookie_days: i64,
}

impl Default for ReferralSettings {
    fn default() -> Self {
        Self {
            cookie_name: "ref".to_string(),
            cookie_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Accounts created with one of these emails receive the ADMIN role.
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub google: Option<OAuthClientSettings>,
    pub github: Option<OAuthClientSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientSettings {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl AppConfig {
    /// Loads the TOML file at `path` and applies `LAUNCHPAD__*` environment
    /// overrides on top of it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let settings = ::config::Config::builder()
            .add_source(::config::File::new(
                &path.to_string_lossy(),
                ::config::FileFormat::Toml,
            ))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("admin.emails"),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to read config: {}", e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.secret.len() < MIN_SECRET_LEN {
            return Err(AppError::Config(format!(
                "auth.secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(AppError::Config(
                "auth.bcrypt_cost must be between 4 and 31".to_string(),
            ));
        }
        if self.session.expiry_hours == 0 {
            return Err(AppError::Config(
                "session.expiry_hours must be positive".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(AppError::Config(
                "rate_limit.max_requests and rate_limit.window_secs must be positive".to_string(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() || self.referral.cookie_name.trim().is_empty()
        {
            return Err(AppError::Config("cookie names cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::hours(self.session.expiry_hours as i64)
    }

    pub fn password_reset_ttl(&self) -> Duration {
        Duration::minutes(self.auth.password_reset_ttl_minutes as i64)
    }

    pub fn email_verification_ttl(&self) -> Duration {
        Duration::hours(self.auth.email_verification_ttl_hours as i64)
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin
            .emails
            .iter()
            .any(|admin| admin.trim().eq_ignore_ascii_case(email.trim()))
    }

    pub fn oauth_client(&self, provider: OAuthProviderKind) -> Option<&OAuthClientSettings> {
        match provider {
            OAuthProviderKind::Google => self.oauth.google.as_ref(),
            OAuthProviderKind::GitHub => self.oauth.github.as_ref(),
        }
    }

    /// Callback URL registered with the provider, falling back to
    /// `{base_url}/oauth/{provider}/callback`.
    pub fn oauth_redirect_url(&self, provider: OAuthProviderKind) -> Option<String> {
        let client = self.oauth_client(provider)?;
        Some(client.redirect_url.clone().unwrap_or_else(|| {
            format!(
                "{}/oauth/{}/callback",
                self.server.base_url.trim_end_matches('/'),
                provider
            )
        }))
    }

    /// Absolute link into the frontend, e.g. `link("/reset-password", token)`.
    pub fn frontend_link(&self, path: &str, token: &str) -> String {
        format!(
            "{}{}?token={}",
            self.server.base_url.trim_end_matches('/'),
            path,
            token
        )
    }
}
