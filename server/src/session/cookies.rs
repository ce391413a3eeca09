use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};

use crate::config::AppConfig;

pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

fn http_only_cookie(
    name: &str,
    value: String,
    max_age_secs: i64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build(name.to_owned(), value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(CookieDuration::seconds(max_age_secs))
        .finish()
}

fn removal(name: &str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build(name.to_owned(), "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .finish();
    cookie.make_removal();
    cookie
}

pub fn session_cookie(config: &AppConfig, token: &str) -> Cookie<'static> {
    http_only_cookie(
        &config.session.cookie_name,
        token.to_string(),
        config.session_ttl().num_seconds(),
        config.session.secure_cookies,
    )
}

pub fn clear_session_cookie(config: &AppConfig) -> Cookie<'static> {
    removal(&config.session.cookie_name, config.session.secure_cookies)
}

pub fn referral_cookie(config: &AppConfig, slug: &str) -> Cookie<'static> {
    http_only_cookie(
        &config.referral.cookie_name,
        slug.to_string(),
        config.referral.cookie_days * 24 * 3600,
        config.session.secure_cookies,
    )
}

pub fn clear_referral_cookie(config: &AppConfig) -> Cookie<'static> {
    removal(&config.referral.cookie_name, config.session.secure_cookies)
}

pub fn oauth_state_cookie(config: &AppConfig, state: String, ttl_secs: i64) -> Cookie<'static> {
    http_only_cookie(
        OAUTH_STATE_COOKIE,
        state,
        ttl_secs,
        config.session.secure_cookies,
    )
}

pub fn clear_oauth_state_cookie(config: &AppConfig) -> Cookie<'static> {
    removal(OAUTH_STATE_COOKIE, config.session.secure_cookies)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::from_toml_str(
            "[auth]\nsecret = \"0123456789abcdef0123456789abcdef\"\n[session]\nexpiry_hours = 2\nsecure_cookies = true\n",
        )
        .unwrap()
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie(&config(), "tok");
        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(CookieDuration::hours(2)));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(&config());
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(CookieDuration::ZERO));
    }
}
