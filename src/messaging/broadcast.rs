use log::{debug, error, info};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{Accident, Severity};

/// Events pushed to dashboard sessions, framed as `{event, data}` JSON
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    NewAccident(serde_json::Value),
    AccidentUpdate(serde_json::Value),
    Subscribed { severity: Severity },
    Pong { timestamp: i64 },
}

impl OutboundEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::NewAccident(_) => "new-accident",
            Self::AccidentUpdate(_) => "accident-update",
            Self::Subscribed { .. } => "subscribed",
            Self::Pong { .. } => "pong",
        }
    }
}

struct Session {
    tx: UnboundedSender<String>,
    rooms: HashSet<String>,
}

/// Fan-out of record events to live dashboard sessions.
///
/// The session registry is owned here and reachable only through
/// connect/disconnect/subscribe/broadcast. Delivery is at-most-once and
/// best-effort: dead sessions are pruned on send failure, nothing is queued
/// for them, and per-session ordering follows broadcast order through the
/// session channel.
pub struct Broadcaster {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session and hand back its event receiver
    pub async fn connect(&self) -> (Uuid, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            Session {
                tx,
                rooms: HashSet::new(),
            },
        );
        info!("Client connected: {} (total: {})", id, sessions.len());

        (id, rx)
    }

    /// Remove a session; safe to call twice or for an unknown id
    pub async fn disconnect(&self, id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&id).is_some() {
            info!("Client disconnected: {} (total: {})", id, sessions.len());
        }
    }

    /// Join a room; returns false for an unknown session
    pub async fn subscribe(&self, id: Uuid, room: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) => {
                session.rooms.insert(room.to_string());
                info!("Client {} subscribed to {}", id, room);
                true
            }
            None => false,
        }
    }

    /// Deliver a reply to a single session through its ordered channel
    pub async fn send_to(&self, id: Uuid, event: &OutboundEvent) -> bool {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.name(), e);
                return false;
            }
        };

        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map_or(false, |session| session.tx.send(frame).is_ok())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Rooms a session has joined
    pub async fn rooms(&self, id: Uuid) -> Option<HashSet<String>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|session| session.rooms.clone())
    }

    /// Push a newly created record to every connected session
    pub async fn broadcast_created(&self, accident: &Accident) {
        match record_frame(accident, "new") {
            Ok(data) => self.broadcast(OutboundEvent::NewAccident(data)).await,
            Err(e) => error!("Failed to serialize accident {}: {}", accident.id, e),
        }
    }

    /// Push a refreshed record to every connected session
    pub async fn broadcast_updated(&self, accident: &Accident) {
        match record_frame(accident, "update") {
            Ok(data) => self.broadcast(OutboundEvent::AccidentUpdate(data)).await,
            Err(e) => error!("Failed to serialize accident {}: {}", accident.id, e),
        }
    }

    async fn broadcast(&self, event: OutboundEvent) {
        let name = event.name();
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize {} event: {}", name, e);
                return;
            }
        };

        let mut dead = Vec::new();
        let delivered = {
            let sessions = self.sessions.read().await;
            let mut delivered = 0;
            for (id, session) in sessions.iter() {
                if session.tx.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
            delivered
        };

        if !dead.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in dead {
                sessions.remove(&id);
            }
        }

        debug!("Emitted {} to {} clients", name, delivered);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn record_frame(accident: &Accident, tag: &str) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(accident)?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "_event".to_string(),
            serde_json::Value::String(tag.to_string()),
        );
    }
    Ok(value)
}
