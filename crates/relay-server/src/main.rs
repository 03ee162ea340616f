//! Device relay server.
//!
//! Bridges browsers and a remote camera/servo board: websocket commands go
//! out as UDP datagrams, telemetry and motion datagrams fan out to every
//! browser, camera and audio TCP streams are proxied per viewer, and the
//! recorder's clip directory is listed, pruned, and served.

mod api;
mod clients;
mod clips;
mod config;
mod datagram;
mod openapi;
mod relay;
mod service;
mod startup;
mod state;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-server", version)]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:3000
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directory the recorder writes clips into
    #[arg(long)]
    clips_dir: Option<PathBuf>,

    /// Front-end static asset directory
    #[arg(long)]
    public_dir: Option<PathBuf>,

    /// Device IP address (overrides config)
    #[arg(long)]
    device_host: Option<IpAddr>,

    /// Optional server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,relay_server=info")
        }))
        .init();

    startup::run(args).await
}
