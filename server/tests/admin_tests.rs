mod common;

use actix_web::{http::StatusCode, test, web, App};
use chrono::{Duration, Utc};
use serde_json::json;

use launchpad::db::{User, UserStore, UserUpdate};
use launchpad::plan::sync_trial;
use launchpad::routes;
use launchpad::state::AppState;
use protocol::{AuditAction, Plan};

use common::{audit_actions, context, session_cookie, signup, ADMIN_EMAIL};

async fn find_user(state: &AppState, email: &str) -> User {
    state
        .db
        .users
        .find_by_email(email)
        .await
        .unwrap()
        .unwrap()
}

async fn end_trial(state: &AppState, user: &User) {
    let update = UserUpdate::new().trial_ends_at(Utc::now() - Duration::hours(1));
    state
        .db
        .users
        .update_fields(&user.id.unwrap(), &update)
        .await
        .unwrap()
        .unwrap();
}

fn user_uri(user: &User, suffix: &str) -> String {
    format!("/admin/users/{}{}", user.id.unwrap().to_hex(), suffix)
}

#[actix_web::test]
async fn test_admin_routes_are_guarded() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/admin/stats").to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let resp = test::call_service(&app, signup("plain@example.com").to_request()).await;
    let cookie = session_cookie(&resp);
    let req = test::TestRequest::get()
        .uri("/admin/stats")
        .cookie(cookie)
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::FORBIDDEN
    );
}

#[actix_web::test]
async fn test_stats_and_user_listing() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    for email in ["alice@example.com", "bob@example.com", "carol@sample.org"] {
        test::call_service(&app, signup(email).to_request()).await;
    }

    // Bob's trial ends without him coming back.
    let bob = find_user(&ctx.state, "bob@example.com").await;
    end_trial(&ctx.state, &bob).await;

    let req = test::TestRequest::get()
        .uri("/admin/stats")
        .cookie(admin.clone())
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total_users"], 4);
    assert_eq!(body["pro_users"], 3);
    assert_eq!(body["basic_users"], 1);
    assert_eq!(body["trialing_users"], 3);
    assert_eq!(body["admin_users"], 1);
    assert_eq!(body["active_sessions"], 4);

    let req = test::TestRequest::get()
        .uri("/admin/users?search=EXAMPLE.com&per_page=2")
        .cookie(admin.clone())
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["per_page"], 2);
    assert_eq!(body["users"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri("/admin/users?plan=BASIC")
        .cookie(admin.clone())
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["users"][0]["email"], "bob@example.com");
    assert_eq!(body["users"][0]["plan"]["plan"], "BASIC");
    assert_eq!(body["users"][0]["plan"]["on_trial"], false);

    let req = test::TestRequest::get()
        .uri("/admin/users?plan=PRO")
        .cookie(admin.clone())
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 3);

    // The downgrade is audited once even though stats and listings ran it.
    let expired: Vec<_> = audit_actions(&ctx.state)
        .await
        .into_iter()
        .filter(|action| *action == AuditAction::TrialExpired)
        .collect();
    assert_eq!(expired.len(), 1);

    let req = test::TestRequest::get()
        .uri("/admin/users?per_page=1000")
        .cookie(admin.clone())
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["per_page"], 100);

    let req = test::TestRequest::get()
        .uri("/admin/users/not-an-id")
        .cookie(admin)
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[actix_web::test]
async fn test_plan_override_survives_trial_expiry() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    test::call_service(&app, signup("trial@example.com").to_request()).await;

    let user = find_user(&ctx.state, "trial@example.com").await;
    end_trial(&ctx.state, &user).await;

    let req = test::TestRequest::put()
        .uri(&user_uri(&user, "/plan"))
        .cookie(admin.clone())
        .set_json(json!({ "plan": "PRO" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"]["plan"], "PRO");
    assert_eq!(body["plan"]["plan_override"], true);

    let req = test::TestRequest::get()
        .uri(&user_uri(&user, ""))
        .cookie(admin.clone())
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"]["plan"], "PRO");

    let req = test::TestRequest::delete()
        .uri(&user_uri(&user, "/plan-override"))
        .cookie(admin)
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"]["plan"], "BASIC");
    assert_eq!(body["plan"]["plan_override"], false);

    let stored = find_user(&ctx.state, "trial@example.com").await;
    assert_eq!(stored.plan, Plan::Basic);

    let actions = audit_actions(&ctx.state).await;
    assert_eq!(actions[0], AuditAction::TrialExpired);
    assert_eq!(actions[1], AuditAction::PlanOverrideCleared);
    assert_eq!(actions[2], AuditAction::PlanChanged);
}

#[actix_web::test]
async fn test_extend_trial() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    test::call_service(&app, signup("extend@example.com").to_request()).await;
    let user = find_user(&ctx.state, "extend@example.com").await;

    for days in [0, 366] {
        let req = test::TestRequest::post()
            .uri(&user_uri(&user, "/trial"))
            .cookie(admin.clone())
            .set_json(json!({ "days": days }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    let req = test::TestRequest::post()
        .uri(&user_uri(&user, "/trial"))
        .cookie(admin)
        .set_json(json!({ "days": 10 }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"]["plan"], "PRO");
    // Extends from the current end, not from today.
    assert_eq!(body["plan"]["trial_days_remaining"], 24);
}

#[actix_web::test]
async fn test_plan_change_honours_override_flag() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    test::call_service(&app, signup("flag@example.com").to_request()).await;
    let user = find_user(&ctx.state, "flag@example.com").await;

    let req = test::TestRequest::put()
        .uri(&user_uri(&user, "/plan"))
        .cookie(admin.clone())
        .set_json(json!({ "plan": "PRO", "override": false }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"]["plan"], "PRO");
    assert_eq!(body["plan"]["plan_override"], false);
    assert_eq!(body["plan"]["on_trial"], true);

    let stored = find_user(&ctx.state, "flag@example.com").await;
    assert!(!stored.plan_override);
}

#[actix_web::test]
async fn test_extending_trial_releases_pinned_plan() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    test::call_service(&app, signup("pinned@example.com").to_request()).await;
    let user = find_user(&ctx.state, "pinned@example.com").await;

    let req = test::TestRequest::put()
        .uri(&user_uri(&user, "/plan"))
        .cookie(admin.clone())
        .set_json(json!({ "plan": "PRO", "override": true }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"]["plan_override"], true);

    let req = test::TestRequest::post()
        .uri(&user_uri(&user, "/trial"))
        .cookie(admin)
        .set_json(json!({ "days": 5 }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["plan"]["plan"], "PRO");
    assert_eq!(body["plan"]["plan_override"], false);
    assert_eq!(body["plan"]["on_trial"], true);

    // Once the extended trial ends the user falls back to BASIC.
    end_trial(&ctx.state, &user).await;
    let mut stored = find_user(&ctx.state, "pinned@example.com").await;
    sync_trial(
        ctx.state.db.users.as_ref(),
        &ctx.state.audit,
        &mut stored,
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(stored.plan, Plan::Basic);
}

#[actix_web::test]
async fn test_role_changes() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    let resp = test::call_service(&app, signup("promote@example.com").to_request()).await;
    let promoted_cookie = session_cookie(&resp);

    let me = find_user(&ctx.state, ADMIN_EMAIL).await;
    let req = test::TestRequest::put()
        .uri(&user_uri(&me, "/role"))
        .cookie(admin.clone())
        .set_json(json!({ "role": "USER" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );

    let user = find_user(&ctx.state, "promote@example.com").await;
    let req = test::TestRequest::put()
        .uri(&user_uri(&user, "/role"))
        .cookie(admin)
        .set_json(json!({ "role": "ADMIN" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["role"], "ADMIN");

    let req = test::TestRequest::get()
        .uri("/admin/stats")
        .cookie(promoted_cookie)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_revoke_sessions_and_delete_user() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    let resp = test::call_service(&app, signup("target@example.com").to_request()).await;
    let target_cookie = session_cookie(&resp);
    let target = find_user(&ctx.state, "target@example.com").await;

    let req = test::TestRequest::post()
        .uri(&user_uri(&target, "/revoke-sessions"))
        .cookie(admin.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/account/me")
        .cookie(target_cookie)
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let me = find_user(&ctx.state, ADMIN_EMAIL).await;
    let req = test::TestRequest::delete()
        .uri(&user_uri(&me, ""))
        .cookie(admin.clone())
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );

    let req = test::TestRequest::delete()
        .uri(&user_uri(&target, ""))
        .cookie(admin.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&user_uri(&target, ""))
        .cookie(admin.clone())
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );

    // The history of the deleted user stays queryable.
    let req = test::TestRequest::get()
        .uri(&format!(
            "/admin/audit-logs?user_id={}",
            target.id.unwrap().to_hex()
        ))
        .cookie(admin.clone())
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let actions: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["USER_DELETED", "SESSIONS_REVOKED", "USER_SIGNUP"]);
    assert_eq!(
        body["entries"][0]["actor_id"],
        me.id.unwrap().to_hex().as_str()
    );

    let req = test::TestRequest::get()
        .uri("/admin/audit-logs?user_id=zzz")
        .cookie(admin)
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[actix_web::test]
async fn test_audit_log_filters_by_action() {
    let ctx = context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, signup(ADMIN_EMAIL).to_request()).await;
    let admin = session_cookie(&resp);
    test::call_service(&app, signup("one@example.com").to_request()).await;
    test::call_service(&app, signup("two@example.com").to_request()).await;

    let req = test::TestRequest::get()
        .uri("/admin/audit-logs?action=USER_SIGNUP&per_page=2")
        .cookie(admin)
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["entries"].as_array().unwrap().len(), 2);
}
