use actix_web::{middleware::from_fn, web};

use crate::handlers::{self, account, admin, auth, oauth, referral};
use crate::middleware::{admin_middleware, auth_middleware, rate_limit_middleware};

/// Registers every route. Used by `main` and by the integration tests, which
/// only have to add `web::Data<AppState>` on top.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::health_check)
        .service(referral::follow_referral)
        .service(
            web::scope("/auth")
                .wrap(from_fn(rate_limit_middleware))
                .service(auth::signup)
                .service(auth::login)
                .service(auth::forgot_password)
                .service(auth::reset_password)
                .service(auth::verify_email),
        )
        .service(
            web::scope("/oauth")
                .service(oauth::callback)
                .service(oauth::start),
        )
        .service(
            web::scope("/account")
                .wrap(from_fn(auth_middleware))
                .service(account::me)
                .service(account::plan)
                .service(account::logout)
                .service(account::change_password)
                .service(account::resend_verification)
                .service(account::list_sessions)
                .service(account::revoke_other_sessions)
                .service(account::unlink_oauth),
        )
        .service(
            // Registered last, runs first: auth fills the extension admin reads.
            web::scope("/admin")
                .wrap(from_fn(admin_middleware))
                .wrap(from_fn(auth_middleware))
                .service(admin::stats)
                .service(admin::list_users)
                .service(admin::get_user)
                .service(admin::update_plan)
                .service(admin::clear_plan_override)
                .service(admin::extend_trial)
                .service(admin::update_role)
                .service(admin::revoke_user_sessions)
                .service(admin::delete_user)
                .service(admin::list_audit_logs)
                .service(referral::list_links)
                .service(referral::create_link)
                .service(referral::update_link)
                .service(referral::delete_link),
        );
}
