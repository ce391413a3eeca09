use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use mongodb::bson::oid::ObjectId;

use protocol::{
    AdminStatsResponse, AuditAction, AuditLogListResponse, AuditLogQuery, ExtendTrialRequest,
    MessageResponse, Plan, Role, UpdatePlanRequest, UpdateRoleRequest, UserListQuery,
    UserListResponse,
};

use super::{audit_view, paging, parse_object_id, user_view};
use crate::{
    audit::AuditEvent,
    db::{AuditFilter, User, UserFilter, UserUpdate},
    error::{AppError, Result},
    middleware::AuthenticatedUser,
    plan::{sweep_expired_trials, sync_trial},
    state::AppState,
    validation::validate_trial_days,
};

async fn load_user(state: &AppState, raw_id: &str) -> Result<(ObjectId, User)> {
    let id = parse_object_id(raw_id, "User")?;
    let user = state
        .db
        .users
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;
    Ok((id, user))
}

async fn update_user(state: &AppState, id: &ObjectId, update: UserUpdate) -> Result<User> {
    state
        .db
        .users
        .update_fields(id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))
}

fn admin_event(
    action: AuditAction,
    req: &HttpRequest,
    state: &AppState,
    admin: &AuthenticatedUser,
    target: ObjectId,
) -> Result<AuditEvent> {
    Ok(AuditEvent::new(action)
        .actor(admin.user_id()?)
        .target(target)
        .ip(state.client_ip(req)))
}

#[get("/stats")]
pub async fn stats(state: web::Data<AppState>) -> Result<HttpResponse> {
    let users = &state.db.users;
    let now = Utc::now();
    sweep_expired_trials(users.as_ref(), &state.audit, now).await?;
    let count_plan = |plan| UserFilter {
        plan: Some(plan),
        ..UserFilter::default()
    };

    let response = AdminStatsResponse {
        total_users: users.count(&UserFilter::default()).await?,
        pro_users: users.count(&count_plan(Plan::Pro)).await?,
        basic_users: users.count(&count_plan(Plan::Basic)).await?,
        trialing_users: users.count_trialing(now).await?,
        admin_users: users
            .count(&UserFilter {
                role: Some(Role::Admin),
                ..UserFilter::default()
            })
            .await?,
        active_sessions: state.sessions.active_session_count().await?,
    };

    Ok(HttpResponse::Ok().json(response))
}

#[get("/users")]
pub async fn list_users(
    query: web::Query<UserListQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    sweep_expired_trials(state.db.users.as_ref(), &state.audit, Utc::now()).await?;

    let query = query.into_inner();
    let (page, per_page) = paging(query.page, query.per_page);
    let filter = UserFilter {
        search: query.search,
        plan: query.plan,
        role: query.role,
        page,
        per_page,
    };

    let (users, total) = state.db.users.list(&filter).await?;
    let mut views = Vec::with_capacity(users.len());
    for user in &users {
        views.push(user_view(&state, user).await?);
    }

    Ok(HttpResponse::Ok().json(UserListResponse {
        users: views,
        total,
        page,
        per_page,
    }))
}

#[get("/users/{id}")]
pub async fn get_user(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (_, mut user) = load_user(&state, &path).await?;
    sync_trial(state.db.users.as_ref(), &state.audit, &mut user, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(user_view(&state, &user).await?))
}

#[put("/users/{id}/plan")]
pub async fn update_plan(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdatePlanRequest>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (id, user) = load_user(&state, &path).await?;
    let previous = user.plan;

    let user = update_user(
        &state,
        &id,
        UserUpdate::new()
            .plan(body.plan)
            .plan_override(body.plan_override),
    )
    .await?;

    state
        .audit
        .record(
            admin_event(AuditAction::PlanChanged, &req, &state, &admin, id)?
                .meta("from", previous)
                .meta("to", user.plan)
                .meta("override", user.plan_override),
        )
        .await;

    log::info!(
        "Admin {} set plan of user {} to {}",
        admin.user_id()?.to_hex(),
        id.to_hex(),
        user.plan
    );

    Ok(HttpResponse::Ok().json(user_view(&state, &user).await?))
}

#[delete("/users/{id}/plan-override")]
pub async fn clear_plan_override(
    req: HttpRequest,
    path: web::Path<String>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (id, _) = load_user(&state, &path).await?;
    let mut user = update_user(&state, &id, UserUpdate::new().plan_override(false)).await?;

    state
        .audit
        .record(admin_event(
            AuditAction::PlanOverrideCleared,
            &req,
            &state,
            &admin,
            id,
        )?)
        .await;

    // Without the override an already-ended trial downgrades right away.
    sync_trial(state.db.users.as_ref(), &state.audit, &mut user, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(user_view(&state, &user).await?))
}

#[post("/users/{id}/trial")]
pub async fn extend_trial(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ExtendTrialRequest>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    validate_trial_days(body.days, false)?;
    let (id, user) = load_user(&state, &path).await?;

    let now = Utc::now();
    let base = user.trial_ends_at.filter(|end| *end > now).unwrap_or(now);
    let ends_at = base + Duration::days(i64::from(body.days));
    let was_pinned = user.plan_override;
    // Extending a trial releases any pinned plan.
    let user = update_user(
        &state,
        &id,
        UserUpdate::new()
            .plan(Plan::Pro)
            .plan_override(false)
            .trial_ends_at(ends_at),
    )
    .await?;

    state
        .audit
        .record(
            admin_event(AuditAction::TrialExtended, &req, &state, &admin, id)?
                .meta("days", body.days)
                .meta("trial_ends_at", ends_at.to_rfc3339())
                .meta("override_cleared", was_pinned),
        )
        .await;

    Ok(HttpResponse::Ok().json(user_view(&state, &user).await?))
}

#[put("/users/{id}/role")]
pub async fn update_role(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateRoleRequest>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (id, user) = load_user(&state, &path).await?;
    if id == admin.user_id()? && body.role != Role::Admin {
        return Err(AppError::Validation(
            "You cannot remove your own admin role".to_string(),
        ));
    }

    let previous = user.role;
    let user = update_user(&state, &id, UserUpdate::new().role(body.role)).await?;

    state
        .audit
        .record(
            admin_event(AuditAction::RoleChanged, &req, &state, &admin, id)?
                .meta("from", previous)
                .meta("to", user.role),
        )
        .await;

    Ok(HttpResponse::Ok().json(user_view(&state, &user).await?))
}

#[post("/users/{id}/revoke-sessions")]
pub async fn revoke_user_sessions(
    req: HttpRequest,
    path: web::Path<String>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (id, _) = load_user(&state, &path).await?;
    let revoked = state.sessions.invalidate_user_sessions(&id).await?;

    state
        .audit
        .record(
            admin_event(AuditAction::SessionsRevoked, &req, &state, &admin, id)?
                .meta("count", revoked),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::ok(format!(
        "Revoked {revoked} session(s)"
    ))))
}

#[delete("/users/{id}")]
pub async fn delete_user(
    req: HttpRequest,
    path: web::Path<String>,
    admin: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (id, user) = load_user(&state, &path).await?;
    if id == admin.user_id()? {
        return Err(AppError::Validation(
            "You cannot delete your own account".to_string(),
        ));
    }

    state.sessions.invalidate_user_sessions(&id).await?;
    state.tokens.revoke_all(&id).await?;
    state.db.oauth_accounts.delete_for_user(&id).await?;
    state.db.users.delete(&id).await?;

    // Audit entries that reference the user are kept.
    state
        .audit
        .record(
            admin_event(AuditAction::UserDeleted, &req, &state, &admin, id)?
                .meta("email", &user.email),
        )
        .await;

    log::info!(
        "Admin {} deleted user {}",
        admin.user_id()?.to_hex(),
        id.to_hex()
    );

    Ok(HttpResponse::Ok().json(MessageResponse::ok("User deleted")))
}

#[get("/audit-logs")]
pub async fn list_audit_logs(
    query: web::Query<AuditLogQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let (page, per_page) = paging(query.page, query.per_page);
    let target_user_id = query
        .user_id
        .as_deref()
        .map(|raw| {
            ObjectId::parse_str(raw.trim())
                .map_err(|_| AppError::Validation("user_id must be an ObjectId".to_string()))
        })
        .transpose()?;

    let filter = AuditFilter {
        target_user_id,
        action: query.action,
        page,
        per_page,
    };
    let (entries, total) = state.audit.list(&filter).await?;

    Ok(HttpResponse::Ok().json(AuditLogListResponse {
        entries: entries.into_iter().map(audit_view).collect(),
        total,
        page,
        per_page,
    }))
}
