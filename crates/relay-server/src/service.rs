//! Relay service lifecycle.
//!
//! Owns the datagram sockets and background tasks that connect the device to
//! the browser registry. Started once at boot, stopped on shutdown.

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clients::ClientRegistry;
use crate::config::{DeviceEndpoints, ListenerAddrs};
use crate::datagram::{CommandChannel, ListenerKind, bind_socket, spawn_listener};

/// Running datagram listeners plus the command sender.
pub struct RelayService {
    commands: CommandChannel,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayService {
    /// Bind both datagram sockets and spawn the background tasks.
    ///
    /// Commands are sent from the telemetry socket so the device sees one
    /// UDP peer for both directions.
    pub async fn start(
        listeners: &ListenerAddrs,
        device: &DeviceEndpoints,
        clients: ClientRegistry,
    ) -> Result<Self> {
        let telemetry = bind_socket(listeners.telemetry, ListenerKind::Telemetry).await?;
        let motion = bind_socket(listeners.motion, ListenerKind::Motion).await?;
        let shutdown = CancellationToken::new();

        let (commands, sender) =
            CommandChannel::spawn(telemetry.clone(), device.command_addr, shutdown.clone());
        let tasks = vec![
            sender,
            spawn_listener(ListenerKind::Telemetry, telemetry, clients.clone(), shutdown.clone()),
            spawn_listener(ListenerKind::Motion, motion, clients, shutdown.clone()),
        ];
        tracing::info!(command_target = %commands.target(), "relay service started");

        Ok(Self {
            commands,
            shutdown,
            tasks,
        })
    }

    pub fn command_channel(&self) -> CommandChannel {
        self.commands.clone()
    }

    /// Token cancelled when the service stops; relay sessions watch it too.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every task and wait for them to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "relay task ended abnormally");
            }
        }
        tracing::info!("relay service stopped");
    }
}
