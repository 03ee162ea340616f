//! Connected browser session registry.
//!
//! Tracks websocket sessions and fans server messages out to all of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use actix::prelude::*;
use relay_types::ServerMessage;

/// Outbound text frame for a browser websocket session.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct ClientOutbound(pub String);

/// Registry of connected browser sessions.
///
/// Membership only: each entry is the session id and the handle used to push
/// frames to it.
#[derive(Clone)]
pub struct ClientRegistry {
    sessions: Arc<Mutex<HashMap<String, Recipient<ClientOutbound>>>>,
    counter: Arc<AtomicUsize>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            counter: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Lock the session map, recovering it if a holder panicked.
    ///
    /// Every critical section is a single map operation, so the map is never
    /// left half-updated.
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Recipient<ClientOutbound>>> {
        self.sessions.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::warn!("client registry lock poisoned; recovering");
            self.sessions.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Add a session and return its id.
    pub fn register(&self, sender: Recipient<ClientOutbound>) -> String {
        let id = format!("client-{}", self.counter.fetch_add(1, Ordering::Relaxed));
        self.sessions().insert(id.clone(), sender);
        id
    }

    /// Drop a session; returns false when it was already gone.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Send a message to every connected session.
    ///
    /// Returns the number of sessions the frame was queued for.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        let payload = match serde_json::to_string(msg) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode broadcast message");
                return 0;
            }
        };
        let mut delivered = 0;
        for (id, sender) in self.sessions().iter() {
            match sender.try_send(ClientOutbound(payload.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(session_id = %id, error = %e, "broadcast frame dropped");
                }
            }
        }
        delivered
    }
}
