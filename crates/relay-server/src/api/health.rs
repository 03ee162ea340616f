use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub build_date: &'static str,
    /// Connected websocket sessions.
    pub clients: usize,
}

/// Basic health check with build info.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Relay server is healthy", body = HealthResponse)
    )
)]
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        git_sha: env!("GIT_SHA"),
        build_date: env!("BUILD_DATE"),
        clients: state.clients.len(),
    })
}
