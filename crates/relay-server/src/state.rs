//! Shared application state.
//!
//! Holds the client registry and the handles handlers need to reach the device.

use tokio_util::sync::CancellationToken;

use crate::clients::ClientRegistry;
use crate::clips::ClipLibrary;
use crate::datagram::CommandChannel;
use crate::relay::RelayTargets;

/// Shared application state for Actix handlers and websocket actors.
pub struct AppState {
    /// Connected browser sessions.
    pub clients: ClientRegistry,
    /// Outbound command path to the device.
    pub commands: CommandChannel,
    /// Camera and audio upstream addresses.
    pub relays: RelayTargets,
    /// Recorded clip directory.
    pub clips: ClipLibrary,
    /// Cancelled when the relay service stops.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        clients: ClientRegistry,
        commands: CommandChannel,
        relays: RelayTargets,
        clips: ClipLibrary,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            clients,
            commands,
            relays,
            clips,
            shutdown,
        }
    }
}
