//! Browser websocket channel.
//!
//! Each connection registers with the client registry for device events and
//! may send `servo` commands, which are forwarded to the device.

use actix::prelude::*;
use actix_web::{Error, HttpRequest, HttpResponse, get, web};
use actix_web_actors::ws;
use relay_types::{ClientMessage, ServerMessage};

use crate::clients::ClientOutbound;
use crate::datagram::CommandChannel;
use crate::state::AppState;

/// Outcome of one inbound text frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// Command queued for the device.
    Forwarded(String),
    /// Frame was not a usable message; the session stays open.
    Ignored,
}

/// Parse a text frame and forward servo commands.
pub(crate) fn handle_client_text(commands: &CommandChannel, session_id: &str, text: &str) -> Inbound {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "ignoring unparseable frame");
            return Inbound::Ignored;
        }
    };
    match msg {
        ClientMessage::Servo(cmd) => match commands.send(&cmd) {
            Ok(()) => Inbound::Forwarded(cmd),
            Err(e) => {
                tracing::warn!(session_id = %session_id, command = %cmd, error = %e, "servo command not sent");
                Inbound::Ignored
            }
        },
    }
}

pub struct ClientSocket {
    session_id: Option<String>,
    state: web::Data<AppState>,
}

impl ClientSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            session_id: None,
            state,
        }
    }
}

impl Actor for ClientSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address().recipient::<ClientOutbound>();
        let session_id = self.state.clients.register(addr);
        tracing::info!(session_id = %session_id, clients = self.state.clients.len(), "browser connected");
        let hello = ServerMessage::Hello {
            session_id: session_id.clone(),
        };
        if let Ok(text) = serde_json::to_string(&hello) {
            ctx.text(text);
        }
        self.session_id = Some(session_id);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session_id) = self.session_id.take() {
            self.state.clients.remove(&session_id);
            tracing::info!(session_id = %session_id, "browser disconnected");
        }
    }
}

impl Handler<ClientOutbound> for ClientSocket {
    type Result = ();

    fn handle(&mut self, msg: ClientOutbound, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSocket {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "websocket protocol error");
                ctx.stop();
                return;
            }
        };
        match msg {
            ws::Message::Text(text) => {
                let session_id = self.session_id.as_deref().unwrap_or("-");
                if let Inbound::Forwarded(cmd) =
                    handle_client_text(&self.state.commands, session_id, &text)
                {
                    tracing::debug!(session_id = %session_id, command = %cmd, "servo command queued");
                }
            }
            ws::Message::Ping(bytes) => ctx.pong(&bytes),
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Binary(_) => {}
            ws::Message::Continuation(_) => ctx.stop(),
            ws::Message::Nop => {}
        }
    }
}

#[utoipa::path(
    get,
    path = "/socket",
    responses(
        (status = 101, description = "Websocket upgrade; text frames carry ClientMessage and ServerMessage JSON")
    )
)]
#[get("/socket")]
/// Open the browser websocket channel.
pub async fn client_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws::start(ClientSocket::new(state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    async fn channel_to(device: &UdpSocket) -> (CommandChannel, CancellationToken) {
        let local = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let shutdown = CancellationToken::new();
        let (channel, _handle) =
            CommandChannel::spawn(local, device.local_addr().unwrap(), shutdown.clone());
        (channel, shutdown)
    }

    #[tokio::test]
    async fn servo_frame_is_forwarded_verbatim() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (channel, shutdown) = channel_to(&device).await;

        let outcome = handle_client_text(&channel, "client-1", r#"{"event":"servo","data":"STOP"}"#);
        assert_eq!(outcome, Inbound::Forwarded("STOP".to_string()));

        let mut buf = [0u8; 16];
        let (len, _) = timeout(Duration::from_secs(2), device.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"STOP");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn malformed_and_empty_frames_are_ignored() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (channel, shutdown) = channel_to(&device).await;

        assert_eq!(handle_client_text(&channel, "client-1", "LEFT"), Inbound::Ignored);
        assert_eq!(
            handle_client_text(&channel, "client-1", r#"{"event":"servo","data":""}"#),
            Inbound::Ignored
        );

        let mut buf = [0u8; 16];
        let nothing = timeout(Duration::from_millis(150), device.recv_from(&mut buf)).await;
        assert!(nothing.is_err());
        shutdown.cancel();
    }
}
