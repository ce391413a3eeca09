use async_trait::async_trait;
use reqwest::{header, Url};
use serde::Deserialize;

use protocol::OAuthProviderKind;

use super::{provider_error, OAuthClient, OAuthIdentity, OAuthProvider};
use crate::error::Result;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";
const SCOPES: &str = "read:user user:email";
const USER_AGENT: &str = concat!("launchpad/", env!("CARGO_PKG_VERSION"));

/// GitHub answers token errors with 200 and an `error` field.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// The primary address if it is verified, otherwise any verified one.
fn pick_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

pub struct GitHubProvider {
    client: OAuthClient,
    http: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(client: OAuthClient, http: reqwest::Client) -> Self {
        Self { client, http }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        self.http
            .get(url)
            .bearer_auth(token)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| provider_error(self.kind(), "profile request", e))?
            .json()
            .await
            .map_err(|e| provider_error(self.kind(), "profile request", e))
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn kind(&self) -> OAuthProviderKind {
        OAuthProviderKind::GitHub
    }

    fn authorize_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.client.client_id.as_str()),
                ("redirect_uri", self.client.redirect_url.as_str()),
                ("scope", SCOPES),
                ("state", state),
                ("allow_signup", "true"),
            ],
        )
        .map_err(|e| provider_error(self.kind(), "authorize url", e))?;
        Ok(url.into())
    }

    async fn fetch_identity(&self, code: &str) -> Result<OAuthIdentity> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .form(&[
                ("code", code),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("redirect_uri", self.client.redirect_url.as_str()),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| provider_error(self.kind(), "token exchange", e))?
            .json()
            .await
            .map_err(|e| provider_error(self.kind(), "token exchange", e))?;

        let access_token = match (token.access_token, token.error) {
            (Some(access_token), None) => access_token,
            (_, error) => {
                return Err(provider_error(
                    self.kind(),
                    "token exchange",
                    error.unwrap_or_else(|| "missing access_token".to_string()),
                ))
            }
        };

        let user: GitHubUser = self.get_json(USER_URL, &access_token).await?;
        let emails: Vec<GitHubEmail> = self.get_json(EMAILS_URL, &access_token).await?;
        let email = pick_email(&emails);

        Ok(OAuthIdentity {
            provider_account_id: user.id.to_string(),
            email_verified: email.is_some(),
            email,
            name: user.name.or(Some(user.login)),
        })
    }
}
