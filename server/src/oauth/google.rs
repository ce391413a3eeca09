use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use protocol::OAuthProviderKind;

use super::{provider_error, OAuthClient, OAuthIdentity, OAuthProvider};
use crate::error::Result;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const SCOPES: &str = "openid email profile";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
}

impl From<GoogleUserInfo> for OAuthIdentity {
    fn from(info: GoogleUserInfo) -> Self {
        Self {
            provider_account_id: info.sub,
            email_verified: info.email.is_some() && info.email_verified,
            email: info.email,
            name: info.name,
        }
    }
}

pub struct GoogleProvider {
    client: OAuthClient,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client: OAuthClient, http: reqwest::Client) -> Self {
        Self { client, http }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn kind(&self) -> OAuthProviderKind {
        OAuthProviderKind::Google
    }

    fn authorize_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.client.client_id.as_str()),
                ("redirect_uri", self.client.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| provider_error(self.kind(), "authorize url", e))?;
        Ok(url.into())
    }

    async fn fetch_identity(&self, code: &str) -> Result<OAuthIdentity> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("redirect_uri", self.client.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| provider_error(self.kind(), "token exchange", e))?
            .json()
            .await
            .map_err(|e| provider_error(self.kind(), "token exchange", e))?;

        let info: GoogleUserInfo = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| provider_error(self.kind(), "profile request", e))?
            .json()
            .await
            .map_err(|e| provider_error(self.kind(), "profile request", e))?;

        Ok(info.into())
    }
}
