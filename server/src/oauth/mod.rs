pub mod github;
pub mod google;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use protocol::OAuthProviderKind;

use crate::config::AppConfig;
use crate::error::{AppError, Result};

pub use github::GitHubProvider;
pub use google::GoogleProvider;
pub use state::{OAuthStateClaims, OAuthStateError, OAuthStateSigner};

/// The provider's view of the person who just signed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub provider_account_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> OAuthProviderKind;

    /// URL the browser is sent to; `state` comes back on the callback.
    fn authorize_url(&self, state: &str) -> Result<String>;

    /// Exchanges the authorization code and loads the account profile.
    async fn fetch_identity(&self, code: &str) -> Result<OAuthIdentity>;
}

/// Client credentials shared by the built-in providers.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

pub(crate) fn provider_error(
    provider: OAuthProviderKind,
    step: &str,
    err: impl std::fmt::Display,
) -> AppError {
    log::warn!("OAuth {} failed for {}: {}", step, provider, err);
    AppError::OAuth(format!("{provider} {step} failed"))
}

/// Providers that have credentials configured.
#[derive(Clone, Default)]
pub struct OAuthProviders {
    providers: HashMap<OAuthProviderKind, Arc<dyn OAuthProvider>>,
}

impl OAuthProviders {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        let mut providers = Self::empty();
        for kind in OAuthProviderKind::ALL {
            let (Some(settings), Some(redirect_url)) =
                (config.oauth_client(kind), config.oauth_redirect_url(kind))
            else {
                continue;
            };
            let client = OAuthClient {
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                redirect_url,
            };
            let provider: Arc<dyn OAuthProvider> = match kind {
                OAuthProviderKind::Google => Arc::new(GoogleProvider::new(client, http.clone())),
                OAuthProviderKind::GitHub => Arc::new(GitHubProvider::new(client, http.clone())),
            };
            log::info!("OAuth provider enabled: {}", kind);
            providers = providers.with(provider);
        }
        providers
    }

    pub fn with(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: OAuthProviderKind) -> Result<Arc<dyn OAuthProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("OAuth provider '{kind}'")))
    }

    pub fn enabled(&self) -> Vec<OAuthProviderKind> {
        OAuthProviderKind::ALL
            .into_iter()
            .filter(|kind| self.providers.contains_key(kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configured_providers_are_enabled() {
        let config = AppConfig::from_toml_str(
            r#"
[auth]
secret = "0123456789abcdef0123456789abcdef"

[oauth.google]
client_id = "google-id"
client_secret = "google-secret"
"#,
        )
        .unwrap();

        let providers = OAuthProviders::from_config(&config, reqwest::Client::new());
        assert_eq!(providers.enabled(), vec![OAuthProviderKind::Google]);
        assert!(providers.get(OAuthProviderKind::Google).is_ok());
        assert!(matches!(
            providers.get(OAuthProviderKind::GitHub),
            Err(AppError::NotFound(_))
        ));
    }
}
