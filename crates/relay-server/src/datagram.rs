//! UDP plumbing to and from the device.
//!
//! Commands go out as one datagram each; telemetry and motion datagrams are
//! decoded as text and republished to every browser. Delivery is lossy in
//! both directions: no acknowledgements, retries, or sequence numbers.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use relay_types::{MotionEvent, ServerMessage};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clients::ClientRegistry;

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65_507;

/// Which device feed a listener republishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Telemetry,
    Motion,
}

impl ListenerKind {
    pub fn label(self) -> &'static str {
        match self {
            ListenerKind::Telemetry => "telemetry",
            ListenerKind::Motion => "motion",
        }
    }

    /// Build the browser event for a decoded datagram.
    pub fn event(self, text: String, received_at_ms: u64) -> ServerMessage {
        match self {
            ListenerKind::Telemetry => ServerMessage::Sample(text),
            ListenerKind::Motion => ServerMessage::Motion(MotionEvent {
                text,
                timestamp: received_at_ms,
            }),
        }
    }
}

/// Decode a datagram payload as trimmed text.
pub fn decode_datagram(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).trim().to_string()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bind a datagram socket; failure here aborts startup.
pub async fn bind_socket(addr: SocketAddr, kind: ListenerKind) -> Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("bind {} socket {addr}", kind.label()))?;
    let local = socket.local_addr().unwrap_or(addr);
    tracing::info!(kind = kind.label(), addr = %local, "udp listening");
    Ok(Arc::new(socket))
}

/// Receive datagrams until shutdown and broadcast each to the registry.
pub fn spawn_listener(
    kind: ListenerKind,
    socket: Arc<UdpSocket>,
    clients: ClientRegistry,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };
            match received {
                Ok((len, peer)) => {
                    let text = decode_datagram(&buf[..len]);
                    tracing::info!(kind = kind.label(), peer = %peer, text = %text, "udp datagram");
                    let delivered = clients.broadcast(&kind.event(text, now_ms()));
                    tracing::debug!(kind = kind.label(), delivered, "datagram republished");
                }
                Err(e) => {
                    tracing::warn!(kind = kind.label(), error = %e, "udp receive error");
                }
            }
        }
        tracing::info!(kind = kind.label(), "udp listener stopped");
    })
}

/// Reasons a command is not queued.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandError {
    /// Empty command strings are not forwarded.
    Empty,
    /// The sender task has stopped.
    Closed,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty command"),
            CommandError::Closed => write!(f, "command channel closed"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Fire-and-forget command path to the device.
#[derive(Clone)]
pub struct CommandChannel {
    tx: mpsc::UnboundedSender<String>,
    target: SocketAddr,
}

impl CommandChannel {
    /// Start the sender task; every queued command becomes one datagram to `target`.
    pub fn spawn(
        socket: Arc<UdpSocket>,
        target: SocketAddr,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let handle = tokio::spawn(async move {
            loop {
                let cmd = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => cmd,
                        None => break,
                    },
                };
                match socket.send_to(cmd.as_bytes(), target).await {
                    Ok(_) => tracing::info!(command = %cmd, target = %target, "sent udp command"),
                    Err(e) => tracing::warn!(command = %cmd, target = %target, error = %e, "udp command send error"),
                }
            }
            tracing::info!("command sender stopped");
        });
        (Self { tx, target }, handle)
    }

    /// Queue a command for the device.
    pub fn send(&self, cmd: &str) -> Result<(), CommandError> {
        if cmd.is_empty() {
            return Err(CommandError::Empty);
        }
        self.tx
            .send(cmd.to_string())
            .map_err(|_| CommandError::Closed)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    async fn local_socket() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    #[test]
    fn decode_trims_whitespace_and_newlines() {
        assert_eq!(decode_datagram(b"  temp=21.5\r\n"), "temp=21.5");
        assert_eq!(decode_datagram(b"\n"), "");
    }

    #[test]
    fn decode_replaces_invalid_utf8() {
        assert_eq!(decode_datagram(b"ok\xff"), "ok\u{fffd}");
    }

    #[test]
    fn motion_events_carry_receipt_time() {
        match ListenerKind::Motion.event("MOTION".to_string(), 1234) {
            ServerMessage::Motion(ev) => {
                assert_eq!(ev.text, "MOTION");
                assert_eq!(ev.timestamp, 1234);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            ListenerKind::Telemetry.event("t".to_string(), 1234),
            ServerMessage::Sample("t".to_string())
        );
    }

    #[tokio::test]
    async fn command_becomes_exactly_one_datagram() {
        let device = local_socket().await;
        let device_addr = device.local_addr().unwrap();
        let local = local_socket().await;
        let local_addr = local.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let (channel, _handle) = CommandChannel::spawn(local, device_addr, shutdown.clone());

        channel.send("LEFT").unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = timeout(Duration::from_secs(2), device.recv_from(&mut buf))
            .await
            .expect("datagram arrives")
            .unwrap();
        assert_eq!(&buf[..len], b"LEFT");
        assert_eq!(from, local_addr);

        let extra = timeout(Duration::from_millis(150), device.recv_from(&mut buf)).await;
        assert!(extra.is_err(), "no second datagram expected");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn empty_command_is_rejected_and_not_sent() {
        let device = local_socket().await;
        let shutdown = CancellationToken::new();
        let (channel, _handle) =
            CommandChannel::spawn(local_socket().await, device.local_addr().unwrap(), shutdown.clone());

        assert_eq!(channel.send(""), Err(CommandError::Empty));

        let mut buf = [0u8; 16];
        let nothing = timeout(Duration::from_millis(150), device.recv_from(&mut buf)).await;
        assert!(nothing.is_err());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn send_after_shutdown_reports_closed() {
        let device = local_socket().await;
        let shutdown = CancellationToken::new();
        let (channel, handle) =
            CommandChannel::spawn(local_socket().await, device.local_addr().unwrap(), shutdown.clone());
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(channel.send("STOP"), Err(CommandError::Closed));
    }

    #[tokio::test]
    async fn listener_stops_on_shutdown() {
        let socket = local_socket().await;
        let shutdown = CancellationToken::new();
        let handle = spawn_listener(
            ListenerKind::Telemetry,
            socket,
            ClientRegistry::new(),
            shutdown.clone(),
        );
        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener exits")
            .unwrap();
    }
}
