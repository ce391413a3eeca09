use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingEmail {
    pub fn password_reset(config: &AppConfig, to: &str, token: &str) -> Self {
        let link = config.frontend_link("/reset-password", token);
        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body: format!(
                "Someone asked to reset the password of your account.\n\n\
                 Open this link within {} minutes to choose a new one:\n{}\n\n\
                 If this wasn't you, you can ignore this email.",
                config.auth.password_reset_ttl_minutes, link
            ),
        }
    }

    pub fn email_verification(config: &AppConfig, to: &str, token: &str) -> Self {
        let link = config.frontend_link("/verify-email", token);
        Self {
            to: to.to_string(),
            subject: "Confirm your email address".to_string(),
            body: format!("Confirm your email address by opening this link:\n{}\n", link),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}

/// Writes outgoing mail to the log instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        log::info!("Email to {}: {}", email.to, email.subject);
        log::debug!("Email body:\n{}", email.body);
        Ok(())
    }
}

/// Keeps every message in memory so tests can pull tokens out of links.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Token from the `?token=` link of the newest message to `to`.
    pub fn last_token_for(&self, to: &str) -> Option<String> {
        self.sent()
            .iter()
            .rev()
            .find(|email| email.to == to)
            .and_then(|email| extract_token(&email.body))
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(email),
            Err(poisoned) => poisoned.into_inner().push(email),
        }
        Ok(())
    }
}

fn extract_token(body: &str) -> Option<String> {
    let start = body.find("?token=")? + "?token=".len();
    let token: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!token.is_empty()).then_some(token)
}
