use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, HttpMessage,
};
use chrono::Utc;

use crate::db::{Session, User};
use crate::error::{AppError, Result};
use crate::plan::sync_trial;
use crate::session::cookies::session_cookie;
use crate::state::AppState;

/// Placed in request extensions by `auth_middleware`; read it with
/// `web::ReqData<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub session: Session,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> Result<mongodb::bson::oid::ObjectId> {
        self.user
            .id
            .ok_or_else(|| AppError::Internal("authenticated user without id".to_string()))
    }
}

/// Resolves a session token to its user, applying trial expiry on the way.
/// The flag tells whether the session expiry was extended.
pub async fn authenticate(state: &AppState, token: &str) -> Result<(AuthenticatedUser, bool)> {
    let validated = state.sessions.validate_session(token).await?;
    let mut user = state
        .db
        .users
        .find_by_id(&validated.session.user_id)
        .await?
        .ok_or(AppError::InvalidSession)?;

    sync_trial(state.db.users.as_ref(), &state.audit, &mut user, Utc::now()).await?;

    Ok((
        AuthenticatedUser {
            user,
            session: validated.session,
        },
        validated.refreshed,
    ))
}

async fn authenticate_request(
    req: &ServiceRequest,
) -> Result<(web::Data<AppState>, String, AuthenticatedUser, bool)> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("application state not registered".to_string()))?;

    let token = req
        .cookie(&state.config.session.cookie_name)
        .map(|c| c.value().to_string())
        .ok_or(AppError::Unauthorized)?;

    let (authenticated, refreshed) = authenticate(&state, &token).await?;
    Ok((state, token, authenticated, refreshed))
}

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> std::result::Result<ServiceResponse<EitherBody<impl MessageBody>>, actix_web::Error> {
    let (state, token, authenticated, refreshed) = match authenticate_request(&req).await {
        Ok(resolved) => resolved,
        Err(err) => return Ok(req.error_response(err).map_into_right_body()),
    };
    req.extensions_mut().insert(authenticated);

    let mut res = next.call(req).await?;

    // Re-send the cookie so the browser's Max-Age follows the extended
    // expiry, unless the handler already set or cleared it.
    let cookie_name = state.config.session.cookie_name.as_str();
    if refreshed && !res.response().cookies().any(|c| c.name() == cookie_name) {
        res.response_mut()
            .add_cookie(&session_cookie(&state.config, &token))
            .map_err(|e| AppError::Internal(format!("failed to set session cookie: {e}")))?;
    }

    Ok(res.map_into_left_body())
}
