//! Live session tracking and outbound fan-out
//!
//! This module owns the single source of truth for "who is connected":
//! - Atomic admission of a pseudo (insert-if-absent)
//! - Identity-checked removal so a stale handler never evicts a newer session
//! - Point-in-time snapshots used for best-effort broadcast
//! - Kick and shutdown on behalf of the operator console
//!
//! Each session exposes only a bounded outbound queue and a close signal. The
//! socket itself belongs to the connection task and its writer task.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};
use shared::info_line;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lines buffered per session before new ones are dropped
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Anything that can push one payload to every live client
///
/// Shared by the message router and the frame broadcaster so neither needs to
/// know about the other.
pub trait FanOut: Send + Sync {
    fn broadcast(&self, payload: &str);
}

/// A live, authenticated client connection
#[derive(Debug)]
pub struct Session {
    id: u64,
    pseudo: String,
    outbound: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pseudo(&self) -> &str {
        &self.pseudo
    }

    /// Queues one line for the client without waiting
    ///
    /// Returns false when the queue is full or the connection is gone.
    pub fn send(&self, line: impl Into<Arc<str>>) -> bool {
        match self.outbound.try_send(line.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping line", self.pseudo);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {}", self.pseudo);
                false
            }
        }
    }

    /// Asks the connection task and writer to wind down
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Concurrent pseudo → session map
///
/// Clone shares the underlying map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    next_session_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an unregistered session and the receiving end of its queue
    pub fn open_session(&self, pseudo: &str) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let session = Session {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1,
            pseudo: pseudo.to_string(),
            outbound: tx,
            closed: CancellationToken::new(),
        };
        (Arc::new(session), rx)
    }

    /// Registers the session unless its pseudo is already live
    ///
    /// On success every other session is told about the arrival.
    pub fn try_insert(&self, session: Arc<Session>) -> bool {
        let id = session.id;
        let pseudo = session.pseudo.clone();

        let inserted = match self.sessions.entry(pseudo.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        };

        if inserted {
            info!("{} is now connected", pseudo);
            self.broadcast_except(&info_line(&format!("{} connected", pseudo)), id);
        }
        inserted
    }

    /// Removes the session if it is still the one registered under its pseudo
    ///
    /// Returns true and announces the departure only when this call removed it.
    pub fn remove(&self, session: &Session) -> bool {
        let removed = self
            .sessions
            .remove_if(&session.pseudo, |_, live| live.id == session.id)
            .is_some();

        if removed {
            info!("{} disconnected", session.pseudo);
            self.broadcast(&info_line(&format!("{} disconnected", session.pseudo)));
        }
        removed
    }

    pub fn lookup(&self, pseudo: &str) -> Option<Arc<Session>> {
        self.sessions.get(pseudo).map(|entry| Arc::clone(entry.value()))
    }

    /// Handles to every session registered at the time of the call
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Connected pseudos in alphabetical order
    pub fn pseudos(&self) -> Vec<String> {
        let mut pseudos: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        pseudos.sort();
        pseudos
    }

    /// Sends the kick notice, evicts the session and closes its connection
    pub fn kick(&self, pseudo: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(pseudo) else {
            return false;
        };

        session.send("[INFO] You have been kicked.");
        session.close();
        info!("{} has been kicked", pseudo);
        self.broadcast(&info_line(&format!("{} has been kicked", pseudo)));
        true
    }

    /// Closes every session and empties the registry
    pub fn disconnect_all(&self, farewell: &str) -> usize {
        let sessions = self.snapshot();
        for session in &sessions {
            self.sessions
                .remove_if(&session.pseudo, |_, live| live.id == session.id);
            session.send(farewell);
            session.close();
        }
        sessions.len()
    }

    fn broadcast_except(&self, payload: &str, excluded: u64) {
        let payload: Arc<str> = Arc::from(payload);
        for session in self.snapshot() {
            if session.id != excluded {
                session.send(Arc::clone(&payload));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl FanOut for SessionRegistry {
    fn broadcast(&self, payload: &str) {
        let payload: Arc<str> = Arc::from(payload);
        for session in self.snapshot() {
            session.send(Arc::clone(&payload));
        }
    }
}
