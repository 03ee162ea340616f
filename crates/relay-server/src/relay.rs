//! Camera and audio byte-stream relays.
//!
//! Every browser request opens its own TCP connection to the device and the
//! device bytes are passed through untouched as the response body. The two
//! connections live and die together: the upstream socket is owned by the
//! body stream, upstream EOF or error ends the body, and a browser hang-up
//! ends the session even while the device has nothing to send.

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use actix_web::dev::Extensions;
use actix_web::web::Bytes;
use futures_util::{Stream, StreamExt, stream::unfold};
use tokio::net::TcpStream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Pause before peeking again when unread request bytes sit on the socket.
const PEEK_BACKOFF: Duration = Duration::from_millis(250);

/// Device stream a relay session pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Camera,
    Audio,
}

impl RelayKind {
    pub fn label(self) -> &'static str {
        match self {
            RelayKind::Camera => "camera",
            RelayKind::Audio => "audio",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            RelayKind::Camera => "multipart/x-mixed-replace; boundary=frame",
            RelayKind::Audio => "audio/mpeg",
        }
    }
}

/// Upstream addresses for both relays.
#[derive(Debug, Clone, Copy)]
pub struct RelayTargets {
    pub camera: SocketAddr,
    pub audio: SocketAddr,
}

impl RelayTargets {
    pub fn addr(&self, kind: RelayKind) -> SocketAddr {
        match kind {
            RelayKind::Camera => self.camera,
            RelayKind::Audio => self.audio,
        }
    }
}

/// Second handle on a browser's TCP connection.
///
/// Attached to every connection through `HttpServer::on_connect` so a relay
/// can notice the browser hanging up without having to write to it.
pub struct BrowserConnection {
    socket: std::net::TcpStream,
}

impl BrowserConnection {
    pub fn from_stream(stream: &TcpStream) -> io::Result<Self> {
        Ok(Self {
            socket: duplicate_socket(stream)?,
        })
    }

    /// `HttpServer::on_connect` hook.
    pub fn attach(conn: &dyn Any, ext: &mut Extensions) {
        let Some(stream) = conn.downcast_ref::<TcpStream>() else {
            return;
        };
        match Self::from_stream(stream) {
            Ok(browser) => {
                ext.insert(browser);
            }
            Err(e) => tracing::warn!(error = %e, "cannot watch browser connection"),
        }
    }

    /// Token cancelled once the browser closes its connection.
    ///
    /// The watcher task exits as soon as the token is cancelled from either side.
    pub fn watch(&self) -> io::Result<CancellationToken> {
        let socket = self.socket.try_clone()?;
        socket.set_nonblocking(true)?;
        let socket = TcpStream::from_std(socket)?;
        let closed = CancellationToken::new();
        tokio::spawn(watch_for_hangup(socket, closed.clone()));
        Ok(closed)
    }
}

#[cfg(unix)]
fn duplicate_socket(stream: &TcpStream) -> io::Result<std::net::TcpStream> {
    use std::os::fd::AsFd;
    Ok(stream.as_fd().try_clone_to_owned()?.into())
}

#[cfg(windows)]
fn duplicate_socket(stream: &TcpStream) -> io::Result<std::net::TcpStream> {
    use std::os::windows::io::AsSocket;
    Ok(stream.as_socket().try_clone_to_owned()?.into())
}

/// Peek until the browser side reports EOF or an error, then cancel `closed`.
async fn watch_for_hangup(socket: TcpStream, closed: CancellationToken) {
    let mut peek_buf = [0u8; 1];
    loop {
        let peeked = tokio::select! {
            _ = closed.cancelled() => return,
            peeked = socket.peek(&mut peek_buf) => peeked,
        };
        match peeked {
            Ok(0) | Err(_) => break,
            // Pipelined bytes belong to the HTTP dispatcher; look again later.
            Ok(_) => {
                tokio::select! {
                    _ = closed.cancelled() => return,
                    _ = tokio::time::sleep(PEEK_BACKOFF) => {}
                }
            }
        }
    }
    closed.cancel();
}

async fn browser_gone(browser: &Option<CancellationToken>) {
    match browser {
        Some(closed) => closed.cancelled().await,
        None => std::future::pending().await,
    }
}

enum Phase {
    Connecting,
    Streaming(ReaderStream<TcpStream>),
    Closed,
}

enum Pull {
    Chunk(Bytes),
    Failed(io::Error),
    Eof,
    Shutdown,
    BrowserGone,
}

/// One browser viewer bound to one upstream connection.
pub struct RelaySession {
    kind: RelayKind,
    upstream: SocketAddr,
    phase: Phase,
    shutdown: CancellationToken,
    browser: Option<CancellationToken>,
    end: &'static str,
    bytes: u64,
}

impl RelaySession {
    pub fn new(kind: RelayKind, upstream: SocketAddr, shutdown: CancellationToken) -> Self {
        Self {
            kind,
            upstream,
            phase: Phase::Connecting,
            shutdown,
            browser: None,
            end: "body_dropped",
            bytes: 0,
        }
    }

    /// End the session when `closed` is cancelled.
    pub fn with_browser(mut self, closed: CancellationToken) -> Self {
        self.browser = Some(closed);
        self
    }

    fn close(&mut self, end: &'static str) {
        self.end = end;
        self.phase = Phase::Closed;
    }

    /// Advance the session until it yields a chunk or closes.
    async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            match &mut self.phase {
                Phase::Connecting => {
                    let connected = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => Err("shutdown"),
                        _ = browser_gone(&self.browser) => Err("browser_closed"),
                        connected = TcpStream::connect(self.upstream) => Ok(connected),
                    };
                    match connected {
                        Ok(Ok(stream)) => {
                            tracing::info!(
                                relay = self.kind.label(),
                                upstream = %self.upstream,
                                "connected to device stream"
                            );
                            self.phase = Phase::Streaming(ReaderStream::new(stream));
                        }
                        Ok(Err(e)) => {
                            tracing::error!(
                                relay = self.kind.label(),
                                upstream = %self.upstream,
                                error = %e,
                                "device stream connect failed"
                            );
                            self.close("connect_failed");
                        }
                        Err(end) => self.close(end),
                    }
                }
                Phase::Streaming(reader) => {
                    let pull = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => Pull::Shutdown,
                        _ = browser_gone(&self.browser) => Pull::BrowserGone,
                        item = reader.next() => match item {
                            Some(Ok(chunk)) => Pull::Chunk(chunk),
                            Some(Err(e)) => Pull::Failed(e),
                            None => Pull::Eof,
                        },
                    };
                    match pull {
                        Pull::Chunk(chunk) => {
                            self.bytes += chunk.len() as u64;
                            return Some(chunk);
                        }
                        Pull::Failed(e) => {
                            tracing::error!(relay = self.kind.label(), error = %e, "device stream error");
                            self.close("device_error");
                        }
                        Pull::Eof => {
                            tracing::info!(relay = self.kind.label(), "device stream ended");
                            self.close("device_eof");
                        }
                        Pull::Shutdown => {
                            tracing::info!(relay = self.kind.label(), "relay stopped for shutdown");
                            self.close("shutdown");
                        }
                        Pull::BrowserGone => self.close("browser_closed"),
                    }
                }
                Phase::Closed => return None,
            }
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if let Some(closed) = &self.browser {
            closed.cancel();
        }
        // `end` is still the default when actix dropped the body first;
        // dropping `phase` releases the upstream socket.
        tracing::info!(
            relay = self.kind.label(),
            bytes = self.bytes,
            end = self.end,
            "relay session closed"
        );
    }
}

/// Turn a session into a response body stream.
pub fn relay_stream(
    session: RelaySession,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> + 'static {
    unfold(session, |mut session| async move {
        let chunk = session.next_chunk().await?;
        Some((Ok::<Bytes, actix_web::Error>(chunk), session))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn fake_device() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn passes_device_bytes_through_unchanged() {
        let (listener, addr) = fake_device().await;
        let device = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"--frame\r\n\xff\xd8jpeg").await.unwrap();
            sock.write_all(b"\xff\xd9").await.unwrap();
        });

        let stream = relay_stream(RelaySession::new(RelayKind::Camera, addr, CancellationToken::new()));
        let chunks: Vec<_> = timeout(Duration::from_secs(2), stream.collect::<Vec<_>>())
            .await
            .expect("stream ends when device closes");
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(body, b"--frame\r\n\xff\xd8jpeg\xff\xd9");
        device.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_browser_side_closes_upstream() {
        let (listener, addr) = fake_device().await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"chunk").await.unwrap();
            let mut buf = [0u8; 8];
            // Read returns 0 once the relay side has closed.
            let n = sock.read(&mut buf).await.unwrap_or(0);
            let _ = tx.send(n);
        });

        let mut stream = Box::pin(relay_stream(RelaySession::new(
            RelayKind::Audio,
            addr,
            CancellationToken::new(),
        )));
        let first = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(&first[..], b"chunk");

        drop(stream);
        let n = timeout(Duration::from_secs(2), rx)
            .await
            .expect("upstream closed in time")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn connect_failure_ends_body_immediately() {
        let (listener, addr) = fake_device().await;
        drop(listener);

        let stream = relay_stream(RelaySession::new(RelayKind::Camera, addr, CancellationToken::new()));
        let chunks: Vec<_> = timeout(Duration::from_secs(2), stream.collect::<Vec<_>>())
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn shutdown_tears_down_streaming_session() {
        let (listener, addr) = fake_device().await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"x").await.unwrap();
            let mut buf = [0u8; 1];
            let n = sock.read(&mut buf).await.unwrap_or(0);
            let _ = tx.send(n);
        });

        let shutdown = CancellationToken::new();
        let mut stream = Box::pin(relay_stream(RelaySession::new(
            RelayKind::Camera,
            addr,
            shutdown.clone(),
        )));
        assert!(stream.next().await.is_some());

        shutdown.cancel();
        let next = timeout(Duration::from_secs(2), stream.next()).await.unwrap();
        assert!(next.is_none());
        drop(stream);
        assert_eq!(timeout(Duration::from_secs(2), rx).await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn browser_hangup_closes_idle_upstream() {
        let (listener, addr) = fake_device().await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1];
            let n = sock.read(&mut buf).await.unwrap_or(0);
            let _ = tx.send(n);
        });

        let browser = CancellationToken::new();
        let session = RelaySession::new(RelayKind::Camera, addr, CancellationToken::new())
            .with_browser(browser.clone());
        let mut body = Box::pin(relay_stream(session));
        let hang_up = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            browser.cancel();
        };
        let (next, ()) = tokio::join!(timeout(Duration::from_secs(2), body.next()), hang_up);
        assert!(next.expect("body ends after hang-up").is_none());
        assert_eq!(timeout(Duration::from_secs(2), rx).await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn browser_gone_before_connect_skips_upstream() {
        let (listener, addr) = fake_device().await;
        let browser = CancellationToken::new();
        browser.cancel();

        let session = RelaySession::new(RelayKind::Audio, addr, CancellationToken::new())
            .with_browser(browser);
        let chunks: Vec<_> = relay_stream(session).collect().await;
        assert!(chunks.is_empty());
        assert!(
            timeout(Duration::from_millis(150), listener.accept()).await.is_err(),
            "no upstream connection expected"
        );
    }

    #[tokio::test]
    async fn watcher_reports_browser_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        let closed = BrowserConnection::from_stream(&server_side)
            .unwrap()
            .watch()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closed.is_cancelled());

        drop(client);
        timeout(Duration::from_secs(2), closed.cancelled())
            .await
            .expect("hang-up noticed");
    }

    #[test]
    fn content_types_match_stream_kind() {
        assert_eq!(
            RelayKind::Camera.content_type(),
            "multipart/x-mixed-replace; boundary=frame"
        );
        assert_eq!(RelayKind::Audio.content_type(), "audio/mpeg");
    }
}
