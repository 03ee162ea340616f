//! Actix server startup + app wiring.
//!
//! Resolves config, starts the relay service, and mounts routes, middleware,
//! OpenAPI docs, and the two static file roots.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use actix_cors::Cors;
use actix_files::Files;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header;
use actix_web::middleware::{Next, from_fn};
use actix_web::{App, Error, HttpServer, web};
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::clients::ClientRegistry;
use crate::clips::ClipLibrary;
use crate::config::{self, DEFAULT_BIND};
use crate::openapi;
use crate::relay::{BrowserConnection, RelayTargets};
use crate::service::RelayService;
use crate::state::AppState;

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let device = config::device_from_config(&cfg, args.device_host)?;
    let listeners = config::listeners_from_config(&cfg)?;
    let clips_dir = args
        .clips_dir
        .unwrap_or_else(|| config::clips_dir_from_config(&cfg));
    let public_dir = args
        .public_dir
        .unwrap_or_else(|| config::public_dir_from_config(&cfg));
    let cors_origins = config::cors_origins_from_config(&cfg);

    tracing::info!(
        bind = %bind,
        device = %device.command_addr.ip(),
        camera = %device.camera_addr,
        audio = %device.audio_addr,
        commands = %device.command_addr,
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("GIT_SHA"),
        "starting relay-server"
    );

    let clips = ClipLibrary::new(clips_dir.clone(), config::max_clips_from_config(&cfg));
    clips.ensure_dir()?;
    tracing::info!(
        dir = %clips.dir().display(),
        max_clips = clips.max_clips(),
        "clip retention enabled"
    );

    let public_dir = public_dir.exists().then_some(public_dir);
    match public_dir.as_ref() {
        Some(dir) => tracing::info!(path = %dir.display(), "front-end static assets enabled"),
        None => tracing::info!("front-end static assets disabled (public dir not found)"),
    }

    let clients = ClientRegistry::new();
    let service = RelayService::start(&listeners, &device, clients.clone()).await?;
    let state = web::Data::new(AppState::new(
        clients,
        service.command_channel(),
        RelayTargets {
            camera: device.camera_addr,
            audio: device.audio_addr,
        },
        clips,
        service.shutdown_token(),
    ));
    setup_shutdown(service.shutdown_token());

    let served = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET"])
            .allowed_headers(vec![header::CONTENT_TYPE])
            .max_age(3600);
        for origin in &cors_origins {
            cors = cors.allowed_origin(origin);
        }

        let mut app = App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(from_fn(log_requests))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::client_socket)
            .service(api::camera_stream)
            .service(api::audio_stream)
            .service(api::list_clips)
            .service(api::clips_browser)
            .service(api::health::health)
            .service(Files::new("/clips", clips_dir.clone()));

        // The root mount matches every path, so it goes last.
        if let Some(dir) = public_dir.clone() {
            app = app.service(Files::new("/", dir).index_file("index.html"));
        }

        app
    })
    .on_connect(BrowserConnection::attach)
    .bind(bind)?
    .run()
    .await;

    service.stop().await;
    served?;
    Ok(())
}

/// How the request logger treats a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestLog {
    /// Polled or static tooling paths.
    Quiet,
    /// Ordinary request, logged once the response is complete.
    Completed,
    /// Long-lived relay or websocket; only the opening is logged here and the
    /// session logs its own close.
    StreamOpened,
}

fn request_log(path: &str) -> RequestLog {
    match path {
        "/health" => RequestLog::Quiet,
        "/camera" | "/audio" | "/socket" => RequestLog::StreamOpened,
        p if p.starts_with("/swagger-ui/") || p.starts_with("/api-doc/") => RequestLog::Quiet,
        _ => RequestLog::Completed,
    }
}

/// Request logging middleware.
async fn log_requests(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let kind = request_log(req.path());
    if kind == RequestLog::Quiet {
        return next.call(req).await;
    }

    let method = req.method().clone();
    let path = req.path().to_string();
    let peer = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("-")
        .to_string();
    let started = Instant::now();
    let res = next.call(req).await?;
    let status = res.status().as_u16();
    match kind {
        RequestLog::StreamOpened => {
            tracing::info!(method = %method, path = %path, status, peer = %peer, "stream opened");
        }
        _ => {
            let user_agent = res
                .request()
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info!(
                method = %method,
                path = %path,
                status,
                peer = %peer,
                user_agent = %user_agent,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "http request"
            );
        }
    }
    Ok(res)
}

/// Load server config from disk, falling back to built-in defaults.
fn load_config(path: Option<&PathBuf>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
    match auto_path.as_deref().filter(|p| p.exists()) {
        Some(path) => {
            tracing::info!(path = %path.display(), "using config next to executable");
            config::ServerConfig::load(path)
        }
        None => {
            tracing::info!("no config file; using built-in defaults");
            Ok(config::ServerConfig::default())
        }
    }
}

/// Resolve the final bind address from args + config.
fn resolve_bind(bind: Option<SocketAddr>, cfg: &config::ServerConfig) -> Result<SocketAddr> {
    Ok(match bind {
        Some(addr) => addr,
        None => config::bind_from_config(cfg)?.unwrap_or(DEFAULT_BIND),
    })
}

/// Install Ctrl+C handler that stops the relay service and the server.
fn setup_shutdown(shutdown: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        shutdown.cancel();
        if let Some(system) = actix_web::rt::System::try_current() {
            system.stop();
        } else {
            std::process::exit(0);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_log_classifies_paths() {
        assert_eq!(request_log("/health"), RequestLog::Quiet);
        assert_eq!(request_log("/swagger-ui/index.html"), RequestLog::Quiet);
        assert_eq!(request_log("/api-doc/openapi.json"), RequestLog::Quiet);
        assert_eq!(request_log("/camera"), RequestLog::StreamOpened);
        assert_eq!(request_log("/audio"), RequestLog::StreamOpened);
        assert_eq!(request_log("/socket"), RequestLog::StreamOpened);
        assert_eq!(request_log("/api/clips"), RequestLog::Completed);
        assert_eq!(request_log("/clips/a.mp4"), RequestLog::Completed);
    }

    #[actix_web::test]
    async fn logger_passes_responses_through() {
        use actix_web::{HttpResponse, test};

        let app = test::init_service(
            App::new()
                .wrap(from_fn(log_requests))
                .route("/health", web::get().to(|| async { HttpResponse::Ok().body("ok") }))
                .route("/api/clips", web::get().to(|| async { HttpResponse::NotFound().finish() })),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
        assert_eq!(&test::read_body(resp).await[..], b"ok");

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/api/clips").to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn resolve_bind_prefers_flag_then_config_then_default() {
        let cfg: config::ServerConfig = toml::from_str("bind = \"127.0.0.1:4000\"").unwrap();
        let flag: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(resolve_bind(Some(flag), &cfg).unwrap(), flag);
        assert_eq!(
            resolve_bind(None, &cfg).unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_bind(None, &config::ServerConfig::default()).unwrap(),
            DEFAULT_BIND
        );
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let missing = std::env::temp_dir().join("relay-server-no-such-config.toml");
        assert!(load_config(Some(&missing)).is_err());
    }
}
