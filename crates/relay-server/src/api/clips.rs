//! Clip listing handlers.

use actix_web::http::header;
use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::clips::render_clips_html;
use crate::state::AppState;

/// Error body returned when the clip directory cannot be read.
#[derive(Serialize, ToSchema)]
pub struct ClipsErrorResponse {
    pub error: String,
}

const LIST_FAILED: &str = "Failed to list clips";
const BROWSER_FAILED: &str = "<h1>Error reading clips directory</h1>";

/// Failures behind the clip endpoints.
#[derive(Debug)]
pub(crate) enum ClipsError {
    /// The clip directory could not be read.
    Unreadable(anyhow::Error),
    /// The blocking pool dropped the listing task.
    Canceled,
}

impl ClipsError {
    fn log(&self, view: &str) {
        match self {
            ClipsError::Unreadable(e) => {
                tracing::error!(view, error = %e, "error reading clips dir");
            }
            ClipsError::Canceled => tracing::error!(view, "clip listing task canceled"),
        }
    }

    /// JSON error response for `/api/clips`.
    pub(crate) fn into_response(self) -> HttpResponse {
        self.log("json");
        HttpResponse::InternalServerError().json(ClipsErrorResponse {
            error: LIST_FAILED.to_string(),
        })
    }

    /// HTML error response for `/clips-browser`.
    pub(crate) fn into_html_response(self) -> HttpResponse {
        self.log("html");
        HttpResponse::InternalServerError()
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .body(BROWSER_FAILED)
    }
}

/// Prune and list clips on the blocking pool.
async fn load_clips(state: &web::Data<AppState>) -> Result<Vec<String>, ClipsError> {
    let clips = state.clips.clone();
    web::block(move || clips.list_clips())
        .await
        .map_err(|_| ClipsError::Canceled)?
        .map_err(ClipsError::Unreadable)
}

#[utoipa::path(
    get,
    path = "/api/clips",
    responses(
        (status = 200, description = "Clip file names, newest name first", body = Vec<String>),
        (status = 500, description = "Clip directory unreadable", body = ClipsErrorResponse)
    )
)]
#[get("/api/clips")]
/// List recorded clips after applying the retention limit.
pub async fn list_clips(state: web::Data<AppState>) -> impl Responder {
    match load_clips(&state).await {
        Ok(names) => HttpResponse::Ok().json(names),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/clips-browser",
    responses(
        (status = 200, description = "HTML folder view of clips", body = String, content_type = "text/html"),
        (status = 500, description = "Clip directory unreadable", body = String, content_type = "text/html")
    )
)]
#[get("/clips-browser")]
/// Render the clip folder view.
pub async fn clips_browser(state: web::Data<AppState>) -> impl Responder {
    match load_clips(&state).await {
        Ok(names) => HttpResponse::Ok()
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .body(render_clips_html(&names)),
        Err(e) => e.into_html_response(),
    }
}
