//! Configuration loading and parsing.
//!
//! Every key is optional; unset keys resolve to the defaults used by the
//! board's stock firmware (device at 192.168.7.2, UDP 12345/12346,
//! camera on 8554, audio on 8555).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000);
pub const DEFAULT_DEVICE_HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 7, 2));
pub const DEFAULT_COMMAND_PORT: u16 = 12345;
pub const DEFAULT_CAMERA_PORT: u16 = 8554;
pub const DEFAULT_AUDIO_PORT: u16 = 8555;
pub const DEFAULT_TELEMETRY_BIND: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 12345);
pub const DEFAULT_MOTION_BIND: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 12346);
pub const DEFAULT_MAX_CLIPS: usize = 5;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address (host:port).
    pub bind: Option<String>,
    /// Front-end static asset directory.
    pub public_dir: Option<String>,
    /// Directory the recorder writes clips into.
    pub clips_dir: Option<String>,
    /// Number of clips kept when listing.
    pub max_clips: Option<usize>,
    /// Extra origins allowed by CORS (front-end dev servers).
    pub cors_origins: Option<Vec<String>>,
    /// Remote device endpoints.
    pub device: Option<DeviceConfig>,
    /// Local datagram listener sockets.
    pub listeners: Option<ListenerConfig>,
}

/// Remote device endpoints from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceConfig {
    /// Device IP address.
    pub host: Option<String>,
    /// UDP port commands are sent to.
    pub command_port: Option<u16>,
    /// TCP port of the camera stream.
    pub camera_port: Option<u16>,
    /// TCP port of the audio stream.
    pub audio_port: Option<u16>,
}

/// Datagram listener sockets from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ListenerConfig {
    /// Telemetry socket; commands are sent from this socket as well.
    pub telemetry_bind: Option<String>,
    /// Motion event socket.
    pub motion_bind: Option<String>,
}

/// Device endpoints with parsed addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoints {
    pub command_addr: SocketAddr,
    pub camera_addr: SocketAddr,
    pub audio_addr: SocketAddr,
}

/// Listener sockets with parsed addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerAddrs {
    pub telemetry: SocketAddr,
    pub motion: SocketAddr,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

/// Resolve the clips directory (defaults to `clips`).
pub fn clips_dir_from_config(cfg: &ServerConfig) -> PathBuf {
    non_empty_path(cfg.clips_dir.as_deref()).unwrap_or_else(|| PathBuf::from("clips"))
}

/// Resolve the front-end directory (defaults to `web`).
pub fn public_dir_from_config(cfg: &ServerConfig) -> PathBuf {
    non_empty_path(cfg.public_dir.as_deref()).unwrap_or_else(|| PathBuf::from("web"))
}

pub fn max_clips_from_config(cfg: &ServerConfig) -> usize {
    cfg.max_clips.unwrap_or(DEFAULT_MAX_CLIPS)
}

/// Resolve device endpoints, applying an optional host override.
pub fn device_from_config(
    cfg: &ServerConfig,
    host_override: Option<IpAddr>,
) -> Result<DeviceEndpoints> {
    let device = cfg.device.as_ref();
    let host = match host_override {
        Some(host) => host,
        None => match device.and_then(|d| d.host.as_deref()) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("parse device host {raw}"))?,
            None => DEFAULT_DEVICE_HOST,
        },
    };
    let port = |pick: fn(&DeviceConfig) -> Option<u16>, default: u16| {
        device.and_then(pick).unwrap_or(default)
    };
    Ok(DeviceEndpoints {
        command_addr: SocketAddr::new(host, port(|d| d.command_port, DEFAULT_COMMAND_PORT)),
        camera_addr: SocketAddr::new(host, port(|d| d.camera_port, DEFAULT_CAMERA_PORT)),
        audio_addr: SocketAddr::new(host, port(|d| d.audio_port, DEFAULT_AUDIO_PORT)),
    })
}

/// Resolve the datagram listener addresses.
pub fn listeners_from_config(cfg: &ServerConfig) -> Result<ListenerAddrs> {
    let listeners = cfg.listeners.as_ref();
    let parse = |raw: Option<&str>, default: SocketAddr, what: &str| -> Result<SocketAddr> {
        match raw {
            Some(raw) => raw.parse().with_context(|| format!("parse {what} {raw}")),
            None => Ok(default),
        }
    };
    Ok(ListenerAddrs {
        telemetry: parse(
            listeners.and_then(|l| l.telemetry_bind.as_deref()),
            DEFAULT_TELEMETRY_BIND,
            "telemetry_bind",
        )?,
        motion: parse(
            listeners.and_then(|l| l.motion_bind.as_deref()),
            DEFAULT_MOTION_BIND,
            "motion_bind",
        )?,
    })
}

pub fn cors_origins_from_config(cfg: &ServerConfig) -> Vec<String> {
    cfg.cors_origins
        .as_ref()
        .map(|origins| {
            origins
                .iter()
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty_path(raw: Option<&str>) -> Option<PathBuf> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}
