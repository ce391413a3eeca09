use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    HttpMessage,
};

use super::auth::AuthenticatedUser;
use crate::error::AppError;

/// Must run after `auth_middleware`.
pub async fn admin_middleware(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<EitherBody<impl MessageBody>>, actix_web::Error> {
    let is_admin = req
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|auth| auth.user.is_admin());

    let rejection = match is_admin {
        Some(true) => None,
        Some(false) => {
            log::warn!("Non-admin request to {}", req.path());
            Some(AppError::Forbidden)
        }
        None => Some(AppError::Unauthorized),
    };
    if let Some(err) = rejection {
        return Ok(req.error_response(err).map_into_right_body());
    }

    Ok(next.call(req).await?.map_into_left_body())
}
