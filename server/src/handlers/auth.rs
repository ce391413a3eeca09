use actix_web::{http::StatusCode, post, web, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;

use protocol::{
    AuditAction, AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, Role,
    ResetPasswordRequest, SignupRequest, VerifyEmailRequest,
};

use super::{require_id, user_view};
use crate::{
    audit::AuditEvent,
    db::{normalize_email, TokenKind, User, UserUpdate},
    error::{AppError, Result},
    mailer::OutgoingEmail,
    password::validate_password,
    plan::{start_trial, sync_trial},
    request::user_agent,
    session::cookies::{clear_referral_cookie, session_cookie},
    state::AppState,
    validation::{clean_name, validate_email},
};

/// Applies signup defaults: admin role for listed emails and the trial from
/// an active referral link (or the default trial). Returns the referral slug
/// that was honoured.
pub(crate) async fn prepare_new_user(
    state: &AppState,
    req: &HttpRequest,
    user: &mut User,
) -> Result<Option<String>> {
    if state.config.is_admin_email(&user.email) {
        user.role = Role::Admin;
    }

    let mut trial_days = state.config.trial.default_days;
    let mut referral = None;
    if let Some(slug) = req
        .cookie(&state.config.referral.cookie_name)
        .map(|c| c.value().to_string())
    {
        match state.db.referrals.find_by_slug(&slug).await? {
            Some(link) if link.active => {
                trial_days = link.trial_days;
                referral = Some(link.slug);
            }
            _ => log::debug!("Ignoring unknown or inactive referral '{}'", slug),
        }
    }

    user.referred_by = referral.clone();
    start_trial(user, trial_days, Utc::now());
    Ok(referral)
}

/// Creates a session for `user` and answers with the user view plus the
/// session cookie.
pub(crate) async fn session_response(
    state: &AppState,
    req: &HttpRequest,
    user: &User,
    status: StatusCode,
) -> Result<HttpResponse> {
    let user_id = require_id(user)?;
    let issued = state
        .sessions
        .create_session(user_id, state.client_ip(req), user_agent(req))
        .await?;

    let response = AuthResponse {
        success: true,
        user: user_view(state, user).await?,
    };

    Ok(HttpResponse::build(status)
        .cookie(session_cookie(&state.config, &issued.token))
        .json(response))
}

pub(crate) async fn send_verification_email(state: &AppState, user: &User) -> Result<()> {
    let user_id = require_id(user)?;
    let token = state
        .tokens
        .issue(user_id, TokenKind::EmailVerification)
        .await?;
    state
        .mailer
        .send(OutgoingEmail::email_verification(&state.config, &user.email, &token))
        .await
}

#[post("/signup")]
pub async fn signup(
    req: HttpRequest,
    body: web::Json<SignupRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    validate_email(&body.email)?;
    validate_password(&body.password)?;
    let name = clean_name(body.name.as_deref())?;

    let email = normalize_email(&body.email);
    if state.db.users.find_by_email(&email).await?.is_some() {
        return Err(AppError::EmailTaken);
    }

    let mut user = User::new(&email, name);
    user.password_hash = Some(state.passwords.hash(&body.password).await?);
    let referral = prepare_new_user(&state, &req, &mut user).await?;
    user.update_last_login();

    let user_id = state.db.users.insert(&user).await?;
    user.id = Some(user_id);

    log::info!("New account created: {}", user_id.to_hex());

    let mut event = AuditEvent::new(AuditAction::UserSignup)
        .by_user(user_id)
        .ip(state.client_ip(&req))
        .meta("method", "password")
        .meta("plan", user.plan);
    if let Some(slug) = &referral {
        event = event.meta("referral", slug);
    }
    state.audit.record(event).await;

    if let Err(err) = send_verification_email(&state, &user).await {
        log::error!(
            "Failed to send verification email to user {}: {}",
            user_id.to_hex(),
            err
        );
    }

    let mut response = session_response(&state, &req, &user, StatusCode::CREATED).await?;
    if referral.is_some() {
        response
            .add_cookie(&clear_referral_cookie(&state.config))
            .map_err(|e| AppError::Internal(format!("failed to clear referral cookie: {e}")))?;
    }
    Ok(response)
}

#[post("/login")]
pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let email = normalize_email(&body.email);
    let ip = state.client_ip(&req);

    if !state.rate_limiter.check_rate_limit(&format!("login:{email}")) {
        log::warn!("Login rate limit exceeded for an account");
        return Err(AppError::RateLimitExceeded);
    }

    let mut user = state
        .db
        .users
        .find_by_email(&email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;
    let user_id = require_id(&user)?;

    let password_ok = match user.password_hash.as_deref() {
        Some(hash) => state.passwords.verify(&body.password, hash).await,
        None => false,
    };

    if !password_ok {
        log::warn!("Failed login attempt for user {}", user_id.to_hex());
        let reason = if user.has_password() {
            "wrong_password"
        } else {
            "no_password"
        };
        state
            .audit
            .record(
                AuditEvent::new(AuditAction::LoginFailed)
                    .target(user_id)
                    .ip(ip)
                    .meta("reason", reason),
            )
            .await;
        return Err(AppError::InvalidCredentials);
    }

    let now = Utc::now();
    sync_trial(state.db.users.as_ref(), &state.audit, &mut user, now).await?;
    let user = state
        .db
        .users
        .update_fields(&user_id, &UserUpdate::new().last_login(now))
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::UserLogin)
                .by_user(user_id)
                .ip(ip)
                .meta("method", "password"),
        )
        .await;

    log::info!("Successful login for user {}", user_id.to_hex());

    session_response(&state, &req, &user, StatusCode::OK).await
}

#[post("/forgot-password")]
pub async fn forgot_password(
    req: HttpRequest,
    body: web::Json<ForgotPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let email = normalize_email(&body.email);

    if let Some(user) = state.db.users.find_by_email(&email).await? {
        let user_id = require_id(&user)?;
        let token = state.tokens.issue(user_id, TokenKind::PasswordReset).await?;
        if let Err(err) = state
            .mailer
            .send(OutgoingEmail::password_reset(&state.config, &user.email, &token))
            .await
        {
            log::error!(
                "Failed to send password reset email to user {}: {}",
                user_id.to_hex(),
                err
            );
        }

        state
            .audit
            .record(
                AuditEvent::new(AuditAction::PasswordResetRequested)
                    .target(user_id)
                    .ip(state.client_ip(&req)),
            )
            .await;
    }

    // Same answer either way so the endpoint can't be used to probe accounts.
    Ok(HttpResponse::Ok().json(MessageResponse::ok(
        "If an account exists for that email, a reset link is on its way",
    )))
}

#[post("/reset-password")]
pub async fn reset_password(
    req: HttpRequest,
    body: web::Json<ResetPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    validate_password(&body.password)?;

    let user_id = state
        .tokens
        .consume(TokenKind::PasswordReset, &body.token)
        .await?;
    let hash = state.passwords.hash(&body.password).await?;
    state
        .db
        .users
        .update_fields(&user_id, &UserUpdate::new().password_hash(Some(hash)))
        .await?
        .ok_or(AppError::InvalidToken)?;

    let revoked = state.sessions.invalidate_user_sessions(&user_id).await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::PasswordReset)
                .by_user(user_id)
                .ip(state.client_ip(&req))
                .meta("sessions_revoked", revoked),
        )
        .await;

    log::info!("Password reset for user {}", user_id.to_hex());

    Ok(HttpResponse::Ok().json(MessageResponse::ok(
        "Password updated. Please sign in again.",
    )))
}

#[post("/verify-email")]
pub async fn verify_email(
    req: HttpRequest,
    body: web::Json<VerifyEmailRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = state
        .tokens
        .consume(TokenKind::EmailVerification, &body.token)
        .await?;
    let user = state
        .db
        .users
        .find_by_id(&user_id)
        .await?
        .ok_or(AppError::InvalidToken)?;

    if !user.is_email_verified() {
        state
            .db
            .users
            .update_fields(&user_id, &UserUpdate::new().email_verified_at(Utc::now()))
            .await?;

        state
            .audit
            .record(
                AuditEvent::new(AuditAction::EmailVerified)
                    .by_user(user_id)
                    .ip(state.client_ip(&req)),
            )
            .await;
    }

    Ok(HttpResponse::Ok().json(MessageResponse::ok("Email address verified")))
}
