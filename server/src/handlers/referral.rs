use actix_web::{delete, get, http::header, post, put, web, HttpRequest, HttpResponse};

use protocol::{
    AuditAction, CreateReferralLinkRequest, MessageResponse, ReferralLinkListResponse,
    UpdateReferralLinkRequest,
};

use super::{parse_object_id, referral_view};
use crate::{
    audit::AuditEvent,
    db::ReferralLink,
    error::{AppError, Result},
    middleware::AuthenticatedUser,
    session::cookies::referral_cookie,
    state::AppState,
    validation::{validate_slug, validate_trial_days},
};

fn clean_link_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::Validation(
            "Name must be between 1 and 100 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Public landing redirect. Unknown or inactive slugs still land on `/`,
/// just without the tracking cookie.
#[get("/r/{slug}")]
pub async fn follow_referral(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let slug = path.into_inner().to_lowercase();
    let mut response = HttpResponse::Found();
    response.insert_header((header::LOCATION, "/"));

    match state.db.referrals.find_by_slug(&slug).await? {
        Some(link) if link.active => {
            state.db.referrals.record_visit(&link.slug).await?;
            log::debug!("Referral visit for '{}'", link.slug);
            response.cookie(referral_cookie(&state.config, &link.slug));
        }
        _ => log::debug!("Ignoring visit for unknown or inactive referral '{}'", slug),
    }

    Ok(response.finish())
}

#[get("/referral-links")]
pub async fn list_links(state: web::Data<AppState>) -> Result<HttpResponse> {
    let links = state.db.referrals.list().await?;
    let mut views = Vec::with_capacity(links.len());
    for link in links {
        views.push(referral_view(&state, link).await?);
    }
    Ok(HttpResponse::Ok().json(ReferralLinkListResponse { links: views }))
}

#[post("/referral-links")]
pub async fn create_link(
    req: HttpRequest,
    body: web::Json<CreateReferralLinkRequest>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let slug = body.slug.trim().to_lowercase();
    validate_slug(&slug)?;
    validate_trial_days(body.trial_days, true)?;
    let name = clean_link_name(&body.name)?;

    let admin_id = admin.user_id()?;
    let mut link = ReferralLink::new(slug, name, body.trial_days, Some(admin_id));
    link.active = body.active;
    let id = state.db.referrals.insert(&link).await?;
    link.id = Some(id);

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::ReferralLinkCreated)
                .actor(admin_id)
                .ip(state.client_ip(&req))
                .meta("link_id", id.to_hex())
                .meta("slug", &link.slug)
                .meta("trial_days", link.trial_days),
        )
        .await;

    log::info!("Referral link '{}' created", link.slug);

    Ok(HttpResponse::Created().json(referral_view(&state, link).await?))
}

#[put("/referral-links/{id}")]
pub async fn update_link(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateReferralLinkRequest>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let id = parse_object_id(&path, "Referral link")?;
    let mut link = state
        .db
        .referrals
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Referral link".to_string()))?;

    let body = body.into_inner();
    let mut event = AuditEvent::new(AuditAction::ReferralLinkUpdated)
        .actor(admin.user_id()?)
        .ip(state.client_ip(&req))
        .meta("link_id", id.to_hex())
        .meta("slug", &link.slug);

    if let Some(name) = body.name {
        link.name = clean_link_name(&name)?;
        event = event.meta("name", &link.name);
    }
    if let Some(days) = body.trial_days {
        validate_trial_days(days, true)?;
        link.trial_days = days;
        event = event.meta("trial_days", days);
    }
    if let Some(active) = body.active {
        link.active = active;
        event = event.meta("active", active);
    }

    if !state.db.referrals.update(&link).await? {
        return Err(AppError::NotFound("Referral link".to_string()));
    }
    state.audit.record(event).await;

    Ok(HttpResponse::Ok().json(referral_view(&state, link).await?))
}

#[delete("/referral-links/{id}")]
pub async fn delete_link(
    req: HttpRequest,
    path: web::Path<String>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let id = parse_object_id(&path, "Referral link")?;
    let link = state
        .db
        .referrals
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Referral link".to_string()))?;

    state.db.referrals.delete(&id).await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditAction::ReferralLinkDeleted)
                .actor(admin.user_id()?)
                .ip(state.client_ip(&req))
                .meta("link_id", id.to_hex())
                .meta("slug", &link.slug),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::ok("Referral link deleted")))
}
