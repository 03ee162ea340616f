//! Camera and audio relay handlers.

use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Responder, get, web};

use crate::relay::{BrowserConnection, RelayKind, RelaySession, relay_stream};
use crate::state::AppState;

fn relay_response(req: &HttpRequest, state: &AppState, kind: RelayKind) -> HttpResponse {
    let upstream = state.relays.addr(kind);
    tracing::info!(relay = kind.label(), upstream = %upstream, "browser opened relay");
    let mut session = RelaySession::new(kind, upstream, state.shutdown.child_token());
    if let Some(browser) = req.conn_data::<BrowserConnection>() {
        match browser.watch() {
            Ok(closed) => session = session.with_browser(closed),
            Err(e) => {
                tracing::warn!(relay = kind.label(), error = %e, "browser hang-up watch failed");
            }
        }
    }

    let mut resp = HttpResponse::Ok();
    resp.insert_header((header::CONTENT_TYPE, kind.content_type()))
        .insert_header((header::CACHE_CONTROL, "no-cache"));
    if kind == RelayKind::Audio {
        resp.force_close();
    }
    resp.streaming(relay_stream(session))
}

#[utoipa::path(
    get,
    path = "/camera",
    responses(
        (status = 200, description = "Live camera passthrough (multipart/x-mixed-replace JPEG frames)")
    )
)]
#[get("/camera")]
/// Relay the device camera stream.
pub async fn camera_stream(req: HttpRequest, state: web::Data<AppState>) -> impl Responder {
    relay_response(&req, &state, RelayKind::Camera)
}

#[utoipa::path(
    get,
    path = "/audio",
    responses(
        (status = 200, description = "Live audio passthrough (audio/mpeg, chunked)")
    )
)]
#[get("/audio")]
/// Relay the device audio stream.
pub async fn audio_stream(req: HttpRequest, state: web::Data<AppState>) -> impl Responder {
    relay_response(&req, &state, RelayKind::Audio)
}
