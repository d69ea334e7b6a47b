//! Single-owner event loop for the session set and chat history
//!
//! All mutation of connected sessions and history happens inside [`Hub::run`],
//! one event at a time. Everything else talks to the hub through a cloneable
//! [`HubHandle`]. The hub never awaits a session: delivery uses `try_send`,
//! and a session whose queue is full or closed is evicted on the spot.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::history::History;
use crate::protocol::{ChatMessage, Envelope};

/// Opaque session ID (ULID string)
pub type SessionId = String;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Hub event loop is not running")]
    Closed,
}

/// What the hub knows about a connected session.
///
/// The hub holds the only sender of the session's outbound queue, so dropping
/// this handle closes the queue and lets the write task finish.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub identity: String,
    pub outbound: mpsc::Sender<Envelope>,
}

/// Requests processed by the hub, in arrival order
#[derive(Debug)]
pub enum HubEvent {
    Register(SessionHandle),
    Unregister(SessionId),
    Broadcast(Envelope),
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Point-in-time view of hub state
#[derive(Debug, Clone)]
pub struct HubSnapshot {
    pub users: usize,
    pub history: Vec<ChatMessage>,
}

/// Cloneable entry point to the hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }

    pub async fn register(&self, session: SessionHandle) -> Result<(), HubError> {
        self.send(HubEvent::Register(session)).await
    }

    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(id)).await
    }

    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast(envelope)).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubEvent::Snapshot(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

pub struct Hub {
    sessions: HashMap<SessionId, SessionHandle>,
    history: History,
    events: mpsc::Receiver<HubEvent>,
    /// Used to post announcements back into our own queue. Weak so the loop
    /// ends once every external handle is gone.
    announcer: mpsc::WeakSender<HubEvent>,
}

impl Hub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let hub = Self {
            sessions: HashMap::new(),
            history: History::new(config.max_history),
            events: rx,
            announcer: tx.downgrade(),
        };
        (hub, HubHandle { events: tx })
    }

    /// Create a hub and run it on its own task
    pub fn spawn(config: &HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        tracing::info!(max_history = self.history.capacity(), "Hub started");

        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }

        tracing::info!("Hub stopped: all handles dropped");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(session) => self.on_register(session),
            HubEvent::Unregister(id) => self.on_unregister(&id),
            HubEvent::Broadcast(envelope) => self.on_broadcast(envelope),
            HubEvent::Snapshot(reply) => {
                let _ = reply.send(HubSnapshot {
                    users: self.sessions.len(),
                    history: self.history.iter().cloned().collect(),
                });
            }
        }
    }

    fn on_register(&mut self, session: SessionHandle) {
        if self.sessions.contains_key(&session.id) {
            tracing::warn!(session = %session.id, "Session registered twice, ignoring");
            return;
        }

        // Replay goes into the queue before any later broadcast can
        for chat in self.history.iter() {
            if let Err(e) = session
                .outbound
                .try_send(Envelope::ChatMessage(chat.clone()))
            {
                tracing::warn!(
                    session = %session.id,
                    identity = %session.identity,
                    reason = delivery_failure(&e),
                    "History replay failed, dropping session"
                );
                return;
            }
        }

        tracing::info!(
            session = %session.id,
            identity = %session.identity,
            replayed = self.history.len(),
            "Session registered"
        );

        let text = format!("{} joined", session.identity);
        self.sessions.insert(session.id.clone(), session);
        self.announce(text);
    }

    fn on_unregister(&mut self, id: &str) {
        match self.sessions.remove(id) {
            Some(session) => {
                tracing::info!(session = %id, identity = %session.identity, "Session unregistered");
                self.announce(format!("{} left", session.identity));
            }
            None => tracing::debug!(session = %id, "Unregister for unknown session, ignoring"),
        }
    }

    fn on_broadcast(&mut self, envelope: Envelope) {
        if let Envelope::ChatMessage(chat) = &envelope {
            self.history.push(chat.clone());
        }

        let mut failed = Vec::new();
        for (id, session) in &self.sessions {
            if let Err(e) = session.outbound.try_send(envelope.clone()) {
                tracing::warn!(
                    session = %id,
                    identity = %session.identity,
                    reason = delivery_failure(&e),
                    "Evicting session"
                );
                failed.push(id.clone());
            }
        }

        for id in failed {
            self.on_unregister(&id);
        }
    }

    /// Schedule a user count refresh and a system line.
    ///
    /// Must not feed our own queue inline: the hub is its only consumer, so a
    /// full queue would deadlock. The count is taken now so it matches the
    /// session set at the time of the triggering event.
    fn announce(&self, text: String) {
        let Some(events) = self.announcer.upgrade() else {
            return;
        };
        let count = self.sessions.len();

        tokio::spawn(async move {
            for envelope in [Envelope::user_count(count), Envelope::system(text)] {
                if events.send(HubEvent::Broadcast(envelope)).await.is_err() {
                    tracing::debug!("Hub gone before announcement was delivered");
                    return;
                }
            }
        });
    }
}

fn delivery_failure<T>(err: &TrySendError<T>) -> &'static str {
    match err {
        TrySendError::Full(_) => "outbound queue full",
        TrySendError::Closed(_) => "outbound queue closed",
    }
}
