use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use protocol::OAuthProviderKind;

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_LEN: usize = 32;
pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum OAuthStateError {
    #[error("state secret is too short (min {MIN_SECRET_LEN} bytes)")]
    SecretTooShort,

    #[error("invalid state format")]
    InvalidFormat,

    #[error("state signature is invalid")]
    InvalidSignature,

    #[error("state is expired")]
    Expired,

    #[error("failed to decode state payload")]
    PayloadDecode,

    #[error("failed to parse state payload")]
    PayloadParse,
}

/// What the login redirect remembers until the provider calls back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthStateClaims {
    pub provider: OAuthProviderKind,
    /// Echoed by the provider as the `state` query parameter.
    pub nonce: String,
    pub redirect_to: String,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
}

impl OAuthStateClaims {
    pub fn is_expired(&self, reference_ms: u64) -> bool {
        reference_ms >= self.expires_at_ms
    }
}

/// Signs state claims as `payload.signature` (both base64url) so they can
/// live in a cookie without server-side storage.
#[derive(Clone)]
pub struct OAuthStateSigner {
    secret: Arc<[u8]>,
    ttl: Duration,
}

impl OAuthStateSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, OAuthStateError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(OAuthStateError::SecretTooShort);
        }

        Ok(Self {
            secret: Arc::<[u8]>::from(secret),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue_state(
        &self,
        provider: OAuthProviderKind,
        nonce: String,
        redirect_to: String,
        issued_at_ms: u64,
    ) -> Result<(String, OAuthStateClaims), OAuthStateError> {
        let claims = OAuthStateClaims {
            provider,
            nonce,
            redirect_to,
            issued_at_ms,
            expires_at_ms: issued_at_ms.saturating_add(self.ttl.as_millis() as u64),
        };
        let token = self.issue(&claims)?;
        Ok((token, claims))
    }

    pub fn issue(&self, claims: &OAuthStateClaims) -> Result<String, OAuthStateError> {
        let payload = serde_json::to_vec(claims).map_err(|_| OAuthStateError::PayloadParse)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let signature = self.sign(payload_b64.as_bytes())?;
        let signature_b64 = URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{payload_b64}.{signature_b64}"))
    }

    pub fn verify(
        &self,
        token: &str,
        reference_ms: u64,
    ) -> Result<OAuthStateClaims, OAuthStateError> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or(OAuthStateError::InvalidFormat)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| OAuthStateError::InvalidFormat)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| OAuthStateError::InvalidSignature)?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| OAuthStateError::InvalidSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| OAuthStateError::PayloadDecode)?;

        let claims: OAuthStateClaims =
            serde_json::from_slice(&payload).map_err(|_| OAuthStateError::PayloadParse)?;

        if claims.nonce.is_empty() || claims.is_expired(reference_ms) {
            return Err(OAuthStateError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, OAuthStateError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| OAuthStateError::InvalidSignature)?;
        mac.update(bytes);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Only same-site absolute paths are allowed as post-login targets.
pub fn sanitize_redirect(target: Option<&str>, fallback: &str) -> String {
    match target.map(str::trim) {
        Some(path)
            if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') =>
        {
            path.to_string()
        }
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signer() -> OAuthStateSigner {
        OAuthStateSigner::new(b"01234567890123456789012345678901", Duration::from_secs(30))
            .expect("valid signer")
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let signer = test_signer();
        let (token, issued) = signer
            .issue_state(
                OAuthProviderKind::GitHub,
                "nonce-1".to_string(),
                "/settings".to_string(),
                1_000,
            )
            .expect("issue state");

        let claims = signer.verify(&token, 1_500).expect("verify state");
        assert_eq!(claims, issued);
        assert_eq!(claims.provider, OAuthProviderKind::GitHub);
        assert_eq!(claims.redirect_to, "/settings");
    }

    #[test]
    fn rejects_tampered_state() {
        let signer = test_signer();
        let (token, _) = signer
            .issue_state(OAuthProviderKind::Google, "n".to_string(), "/".to_string(), 10)
            .expect("issue state");
        let (payload, signature) = token.split_once('.').expect("token split");
        let mut chars: Vec<char> = payload.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        let tampered_payload: String = chars.into_iter().collect();
        let tampered = format!("{tampered_payload}.{signature}");

        assert!(matches!(
            signer.verify(&tampered, 20),
            Err(OAuthStateError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_expired_state() {
        let signer = test_signer();
        let (token, _) = signer
            .issue_state(OAuthProviderKind::Google, "n".to_string(), "/".to_string(), 1_000)
            .expect("issue state");

        assert!(matches!(
            signer.verify(&token, 35_000),
            Err(OAuthStateError::Expired)
        ));
    }

    #[test]
    fn rejects_short_secret() {
        assert!(matches!(
            OAuthStateSigner::new(b"short", STATE_TTL),
            Err(OAuthStateError::SecretTooShort)
        ));
    }

    #[test]
    fn redirect_must_be_local_path() {
        assert_eq!(sanitize_redirect(Some("/billing"), "/dashboard"), "/billing");
        assert_eq!(sanitize_redirect(Some("//evil.com"), "/dashboard"), "/dashboard");
        assert_eq!(
            sanitize_redirect(Some("https://evil.com"), "/dashboard"),
            "/dashboard"
        );
        assert_eq!(sanitize_redirect(Some("/\\evil.com"), "/dashboard"), "/dashboard");
        assert_eq!(sanitize_redirect(None, "/dashboard"), "/dashboard");
    }
}
