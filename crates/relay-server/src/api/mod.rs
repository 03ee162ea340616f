//! HTTP API handlers.
//!
//! Defines the Actix routes for the websocket channel, stream relays, clip
//! listings, and health.

pub mod clips;
pub mod health;
pub mod socket;
pub mod streams;

pub use clips::{clips_browser, list_clips};
pub use socket::client_socket;
pub use streams::{audio_stream, camera_stream};
