use actix_web::{get, web, HttpResponse};
use serde::Serialize;

use crate::{error::Result, state::AppState};

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: &'static str,
    pub active_sessions: u64,
}

#[get("/health")]
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let active_sessions = state.sessions.active_session_count().await?;

    let response = HealthCheckResponse {
        status: "healthy".to_string(),
        version: protocol::protocol_version(),
        active_sessions,
    };

    Ok(HttpResponse::Ok().json(response))
}
