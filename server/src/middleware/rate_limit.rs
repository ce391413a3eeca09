use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;
use crate::error::AppError;
use crate::request::client_ip_from;
use crate::state::AppState;

const DEFAULT_MAX_REQUESTS: usize = 10;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter. Keys are free-form so one instance can track
/// client addresses and login emails side by side.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<DashMap<String, Vec<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.max_requests,
            Duration::from_secs(settings.window_secs),
        )
    }

    pub fn check_rate_limit(&self, key: &str) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window);

        let mut entry = self.requests.entry(key.to_string()).or_default();

        // Remove old entries
        if let Some(cutoff) = cutoff {
            entry.retain(|&timestamp| timestamp > cutoff);
        }

        if entry.len() >= self.max_requests {
            return false;
        }

        entry.push(now);
        true
    }

    pub fn cleanup_old_entries(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };

        self.requests.retain(|_, timestamps| {
            timestamps.retain(|&timestamp| timestamp > cutoff);
            !timestamps.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.requests.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

pub async fn rate_limit_middleware(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<EitherBody<impl MessageBody>>, actix_web::Error> {
    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
        let err = AppError::Internal("application state not registered".to_string());
        return Ok(req.error_response(err).map_into_right_body());
    };

    let ip = client_ip_from(
        &req.connection_info(),
        state.config.server.trust_forwarded_for,
    )
    .unwrap_or_else(|| "unknown".to_string());

    if !state.rate_limiter.check_rate_limit(&format!("ip:{ip}")) {
        log::warn!("Rate limit exceeded for IP: {}", ip);
        return Ok(req
            .error_response(AppError::RateLimitExceeded)
            .map_into_right_body());
    }

    Ok(next.call(req).await?.map_into_left_body())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_per_key() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check_rate_limit("ip:1"));
        assert!(limiter.check_rate_limit("ip:1"));
        assert!(!limiter.check_rate_limit("ip:1"));
        assert!(limiter.check_rate_limit("ip:2"));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.check_rate_limit("k"));
        assert!(!limiter.check_rate_limit("k"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check_rate_limit("k"));
    }
}
