pub mod admin;
pub mod auth;
pub mod rate_limit;

pub use admin::admin_middleware;
pub use auth::{auth_middleware, authenticate, AuthenticatedUser};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
