// Library exports for the binary and the integration tests

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod middleware;
pub mod oauth;
pub mod password;
pub mod plan;
pub mod request;
pub mod routes;
pub mod secrets;
pub mod session;
pub mod state;
pub mod tokens;
pub mod validation;
