use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::clips::list_clips,
        api::clips::clips_browser,
        api::streams::camera_stream,
        api::streams::audio_stream,
        api::health::health,
        api::socket::client_socket,
    ),
    components(
        schemas(
            api::clips::ClipsErrorResponse,
            api::health::HealthResponse,
            relay_types::ClientMessage,
            relay_types::ServerMessage,
            relay_types::MotionEvent,
        )
    ),
    tags(
        (name = "relay-server", description = "Device relay HTTP API")
    )
)]
pub struct ApiDoc;
