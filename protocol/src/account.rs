//! Account level enums: subscription plan, role and OAuth provider.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Subscription plan of a user.
///
/// `Pro` is granted either by a running trial or by an administrator; the
/// server reverts trial users to `Basic` once their trial ends.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    #[default]
    Basic,
    Pro,
}

impl Plan {
    pub const fn as_str(self) -> &'static str {
        match self {
            Plan::Basic => "BASIC",
            Plan::Pro => "PRO",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BASIC" => Ok(Plan::Basic),
            "PRO" => Ok(Plan::Pro),
            _ => Err(ParseEnumError::new("plan", s)),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

/// Third-party identity providers supported for sign-in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProviderKind {
    /// Google OpenID Connect; account ids are the `sub` claim.
    Google,
    /// GitHub OAuth apps; account ids are numeric and stored as strings.
    GitHub,
}

impl OAuthProviderKind {
    pub const ALL: [OAuthProviderKind; 2] = [OAuthProviderKind::Google, OAuthProviderKind::GitHub];

    pub const fn as_str(self) -> &'static str {
        match self {
            OAuthProviderKind::Google => "google",
            OAuthProviderKind::GitHub => "github",
        }
    }
}

impl fmt::Display for OAuthProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProviderKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProviderKind::Google),
            "github" => Ok(OAuthProviderKind::GitHub),
            _ => Err(ParseEnumError::new("oauth provider", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_case_insensitively() {
        assert_eq!("pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert_eq!(" Basic ".parse::<Plan>().unwrap(), Plan::Basic);
        assert!("enterprise".parse::<Plan>().is_err());
    }

    #[test]
    fn provider_display_matches_route_segment() {
        for provider in OAuthProviderKind::ALL {
            assert_eq!(
                provider.to_string().parse::<OAuthProviderKind>().unwrap(),
                provider
            );
        }
    }
}
