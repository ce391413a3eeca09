use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use chrono::Utc;

use protocol::{
    AuditAction, ChangePasswordRequest, MessageResponse, OAuthProviderKind, SessionListResponse,
};

use super::{auth::send_verification_email, session_view, user_view};
use crate::{
    audit::AuditEvent,
    db::UserUpdate,
    error::{AppError, Result},
    middleware::AuthenticatedUser,
    password::validate_password,
    plan::plan_status,
    session::cookies::clear_session_cookie,
    state::AppState,
};

#[get("/me")]
pub async fn me(
    auth: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(user_view(&state, &auth.user).await?))
}

#[get("/plan")]
pub async fn plan(auth: web::ReqData<AuthenticatedUser>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(plan_status(&auth.user, Utc::now())))
}

#[post("/logout")]
pub async fn logout(
    req: HttpRequest,
    auth: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = auth.user_id()?;
    state
        .sessions
        .invalidate_session_by_id(&auth.session.id)
        .await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::UserLogout)
                .by_user(user_id)
                .ip(state.client_ip(&req)),
        )
        .await;

    log::info!("User {} logged out", user_id.to_hex());

    Ok(HttpResponse::Ok()
        .cookie(clear_session_cookie(&state.config))
        .json(MessageResponse::ok("Logged out successfully")))
}

#[post("/change-password")]
pub async fn change_password(
    req: HttpRequest,
    auth: web::ReqData<AuthenticatedUser>,
    body: web::Json<ChangePasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let AuthenticatedUser { user, session } = auth.into_inner();
    let user_id = super::require_id(&user)?;
    validate_password(&body.new_password)?;

    // OAuth-only accounts may set a first password without a current one.
    if let Some(hash) = user.password_hash.as_deref() {
        let current = body
            .current_password
            .as_deref()
            .ok_or_else(|| AppError::Validation("Current password is required".to_string()))?;
        if !state.passwords.verify(current, hash).await {
            return Err(AppError::InvalidCredentials);
        }
    }

    let hash = state.passwords.hash(&body.new_password).await?;
    state
        .db
        .users
        .update_fields(&user_id, &UserUpdate::new().password_hash(Some(hash)))
        .await?
        .ok_or(AppError::InvalidSession)?;

    let revoked = state
        .sessions
        .invalidate_other_sessions(&user_id, &session.id)
        .await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::PasswordChanged)
                .by_user(user_id)
                .ip(state.client_ip(&req))
                .meta("sessions_revoked", revoked),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::ok("Password changed")))
}

#[post("/verify-email/resend")]
pub async fn resend_verification(
    auth: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    if auth.user.is_email_verified() {
        return Err(AppError::Conflict("Email is already verified".to_string()));
    }

    send_verification_email(&state, &auth.user).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::ok("Verification email sent")))
}

#[get("/sessions")]
pub async fn list_sessions(
    auth: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = auth.user_id()?;
    let sessions = state
        .sessions
        .list_user_sessions(&user_id)
        .await?
        .iter()
        .map(|session| session_view(session, &auth.session.id))
        .collect();

    Ok(HttpResponse::Ok().json(SessionListResponse { sessions }))
}

#[post("/sessions/revoke-others")]
pub async fn revoke_other_sessions(
    req: HttpRequest,
    auth: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = auth.user_id()?;
    let revoked = state
        .sessions
        .invalidate_other_sessions(&user_id, &auth.session.id)
        .await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::SessionsRevoked)
                .by_user(user_id)
                .ip(state.client_ip(&req))
                .meta("count", revoked),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::ok(format!(
        "Signed out of {revoked} other session(s)"
    ))))
}

#[delete("/oauth/{provider}")]
pub async fn unlink_oauth(
    req: HttpRequest,
    path: web::Path<String>,
    auth: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let provider: OAuthProviderKind = path
        .parse()
        .map_err(|_| AppError::NotFound(format!("OAuth provider '{}'", path.as_str())))?;
    let user_id = auth.user_id()?;

    let linked = state.db.oauth_accounts.list_for_user(&user_id).await?;
    if !linked.iter().any(|account| account.provider == provider) {
        return Err(AppError::NotFound(format!("Linked {provider} account")));
    }
    if !auth.user.has_password() && linked.len() == 1 {
        return Err(AppError::Conflict(
            "Cannot unlink the only sign-in method; set a password first".to_string(),
        ));
    }

    state.db.oauth_accounts.delete(&user_id, provider).await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::OauthUnlinked)
                .by_user(user_id)
                .ip(state.client_ip(&req))
                .meta("provider", provider),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::ok(format!("{provider} account unlinked"))))
}
