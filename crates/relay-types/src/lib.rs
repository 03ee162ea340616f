use serde::{Deserialize, Serialize};

/// Message sent by a browser over the websocket channel.
///
/// Encoded as `{"event": "<name>", "data": <payload>}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Operator command forwarded verbatim to the device (for example `LEFT`, `RIGHT`, `STOP`).
    Servo(String),
}

/// Message pushed by the server to every connected browser.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting sent once when a session is registered.
    Hello {
        /// Registry id assigned to the session.
        session_id: String,
    },
    /// Trimmed telemetry text received from the device.
    Sample(String),
    /// Motion notification received from the device.
    Motion(MotionEvent),
}

/// Motion notification republished to browsers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MotionEvent {
    /// Trimmed datagram text.
    pub text: String,
    /// Receipt time on the server, milliseconds since the Unix epoch.
    pub timestamp: u64,
}
