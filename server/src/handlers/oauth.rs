use actix_web::{get, http::header, web, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;

use protocol::{AuditAction, OAuthProviderKind};

use super::{auth::prepare_new_user, require_id};
use crate::{
    audit::AuditEvent,
    db::{normalize_email, OAuthAccount, User, UserUpdate},
    error::{AppError, Result},
    middleware::authenticate,
    oauth::{
        state::{now_ms, sanitize_redirect},
        OAuthIdentity,
    },
    plan::sync_trial,
    request::user_agent,
    secrets::generate_token,
    session::cookies::{
        clear_oauth_state_cookie, clear_referral_cookie, oauth_state_cookie, session_cookie,
        OAUTH_STATE_COOKIE,
    },
    state::AppState,
};

const DEFAULT_REDIRECT: &str = "/dashboard";
const MAX_NAME_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct OAuthStartQuery {
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn parse_provider(raw: &str) -> Result<OAuthProviderKind> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("OAuth provider '{raw}'")))
}

/// How the callback ended up with a user.
enum Resolution {
    Existing(User),
    LinkedToSession(User),
    LinkedByEmail(User),
    Created(User, Option<String>),
}

#[get("/{provider}")]
pub async fn start(
    path: web::Path<String>,
    query: web::Query<OAuthStartQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let kind = parse_provider(&path)?;
    let provider = state.oauth.get(kind)?;

    let redirect_to = sanitize_redirect(query.redirect_to.as_deref(), DEFAULT_REDIRECT);
    let nonce = generate_token();
    let (signed, _) = state
        .oauth_state
        .issue_state(kind, nonce.clone(), redirect_to, now_ms())
        .map_err(|e| AppError::Internal(format!("failed to sign OAuth state: {e}")))?;
    let location = provider.authorize_url(&nonce)?;

    let ttl_secs = state.oauth_state.ttl().as_secs() as i64;
    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .cookie(oauth_state_cookie(&state.config, signed, ttl_secs))
        .finish())
}

#[get("/{provider}/callback")]
pub async fn callback(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<OAuthCallbackQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let kind = parse_provider(&path)?;
    let provider = state.oauth.get(kind)?;
    let query = query.into_inner();

    if let Some(error) = query.error {
        log::info!("OAuth sign-in with {} returned error '{}'", kind, error);
        return Err(AppError::OAuth(format!("{kind} sign-in was not completed")));
    }

    let signed = req
        .cookie(OAUTH_STATE_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::OAuth("OAuth state is missing".to_string()))?;
    let claims = state.oauth_state.verify(&signed, now_ms()).map_err(|e| {
        log::warn!("Rejected OAuth state for {}: {}", kind, e);
        AppError::OAuth("OAuth state is invalid or expired".to_string())
    })?;
    if claims.provider != kind || query.state.as_deref() != Some(claims.nonce.as_str()) {
        return Err(AppError::OAuth("OAuth state does not match".to_string()));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::OAuth("Authorization code is missing".to_string()))?;
    let identity = provider.fetch_identity(&code).await?;

    let resolution = resolve_user(&state, &req, kind, &identity).await?;
    let ip = state.client_ip(&req);

    let (mut user, linked, referral, keep_session) = match resolution {
        Resolution::Existing(user) => (user, false, None, false),
        Resolution::LinkedToSession(user) => (user, true, None, true),
        Resolution::LinkedByEmail(user) => (user, true, None, false),
        Resolution::Created(user, referral) => (user, true, referral, false),
    };
    let user_id = require_id(&user)?;

    if linked {
        state
            .audit
            .record(
                AuditEvent::new(AuditAction::OauthLinked)
                    .by_user(user_id)
                    .ip(ip.clone())
                    .meta("provider", kind),
            )
            .await;
    }

    let mut response = HttpResponse::Found();
    response
        .insert_header((header::LOCATION, claims.redirect_to.as_str()))
        .cookie(clear_oauth_state_cookie(&state.config));

    // Linking from a signed-in browser keeps the current session.
    if !keep_session {
        let now = Utc::now();
        sync_trial(state.db.users.as_ref(), &state.audit, &mut user, now).await?;
        state
            .db
            .users
            .update_fields(&user_id, &UserUpdate::new().last_login(now))
            .await?;

        let issued = state
            .sessions
            .create_session(user_id, ip.clone(), user_agent(&req))
            .await?;
        response.cookie(session_cookie(&state.config, &issued.token));

        state
            .audit
            .record(
                AuditEvent::new(AuditAction::UserLogin)
                    .by_user(user_id)
                    .ip(ip)
                    .meta("method", kind),
            )
            .await;

        log::info!("OAuth login with {} for user {}", kind, user_id.to_hex());
    }

    if referral.is_some() {
        response.cookie(clear_referral_cookie(&state.config));
    }

    Ok(response.finish())
}

async fn resolve_user(
    state: &AppState,
    req: &HttpRequest,
    kind: OAuthProviderKind,
    identity: &OAuthIdentity,
) -> Result<Resolution> {
    let accounts = &state.db.oauth_accounts;

    let current = match req.cookie(&state.config.session.cookie_name) {
        Some(cookie) => match authenticate(state, cookie.value()).await {
            Ok((authenticated, _)) => Some(authenticated.user),
            Err(AppError::InvalidSession) => None,
            Err(err) => return Err(err),
        },
        None => None,
    };

    if let Some(account) = accounts.find(kind, &identity.provider_account_id).await? {
        if let Some(current) = &current {
            if current.id != Some(account.user_id) {
                return Err(AppError::OAuthAccountInUse);
            }
        }
        let user = state
            .db
            .users
            .find_by_id(&account.user_id)
            .await?
            .ok_or_else(|| AppError::Internal("OAuth account without user".to_string()))?;
        return Ok(Resolution::Existing(user));
    }

    if let Some(user) = current {
        link_account(state, &user, kind, identity).await?;
        return Ok(Resolution::LinkedToSession(user));
    }

    let email = identity
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::OAuth(format!("{kind} did not share an email address")))?;

    if let Some(user) = state.db.users.find_by_email(&email).await? {
        if !identity.email_verified {
            return Err(AppError::OAuth(format!(
                "{kind} has not verified this email address"
            )));
        }
        link_account(state, &user, kind, identity).await?;
        return Ok(Resolution::LinkedByEmail(user));
    }

    let name = identity
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| n.chars().take(MAX_NAME_CHARS).collect::<String>());
    let mut user = User::new(&email, name);
    if identity.email_verified {
        user.email_verified_at = Some(Utc::now());
    }
    let referral = prepare_new_user(state, req, &mut user).await?;
    let user_id = state.db.users.insert(&user).await?;
    user.id = Some(user_id);

    link_account(state, &user, kind, identity).await?;

    let mut event = AuditEvent::new(AuditAction::UserSignup)
        .by_user(user_id)
        .ip(state.client_ip(req))
        .meta("method", kind)
        .meta("plan", user.plan);
    if let Some(slug) = &referral {
        event = event.meta("referral", slug);
    }
    state.audit.record(event).await;

    log::info!("New account created via {}: {}", kind, user_id.to_hex());

    Ok(Resolution::Created(user, referral))
}

async fn link_account(
    state: &AppState,
    user: &User,
    kind: OAuthProviderKind,
    identity: &OAuthIdentity,
) -> Result<()> {
    let user_id = require_id(user)?;
    let linked = state.db.oauth_accounts.list_for_user(&user_id).await?;
    if linked.iter().any(|account| account.provider == kind) {
        return Err(AppError::Conflict(format!(
            "A different {kind} account is already linked"
        )));
    }

    let account = OAuthAccount::new(user_id, kind, identity.provider_account_id.clone());
    state.db.oauth_accounts.insert(&account).await?;
    log::info!("Linked {} account to user {}", kind, user_id.to_hex());
    Ok(())
}
