//! Active-session registry.
//!
//! Login opens a session scoped to its token lifetime, logout closes it.
//! Closing broadcasts a sign-out event so panels and live streams attached
//! to the session tear down immediately instead of waiting for their next
//! request to be rejected. A background reaper closes sessions whose tokens
//! have expired, so abandoned logins do not pile up. The registry is
//! in-memory: a restart invalidates all sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// How often expired sessions are collected.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Events broadcast to session listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session was closed (logout, expiry, or server shutdown).
    SignedOut { sid: Uuid },
}

/// Registry of currently active sessions.
pub struct SessionRegistry {
    /// Session id to expiry; `None` means the session never expires.
    active: RwLock<HashMap<Uuid, Option<DateTime<Utc>>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            active: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Open a session, active until `expires_at` (or until closed).
    pub async fn open(&self, sid: Uuid, expires_at: Option<DateTime<Utc>>) {
        self.active.write().await.insert(sid, expires_at);
        tracing::info!("Session {} opened", sid);
    }

    /// Whether a session is open and not past its expiry.
    pub async fn is_active(&self, sid: Uuid) -> bool {
        match self.active.read().await.get(&sid) {
            Some(Some(expires_at)) => *expires_at > Utc::now(),
            Some(None) => true,
            None => false,
        }
    }

    /// Close a session and notify listeners. Idempotent.
    pub async fn close(&self, sid: Uuid) {
        let existed = self.active.write().await.remove(&sid).is_some();
        if existed {
            tracing::info!("Session {} closed", sid);
            let _ = self.events.send(SessionEvent::SignedOut { sid });
        }
    }

    /// Close every active session (server shutdown).
    pub async fn close_all(&self) {
        let sids: Vec<Uuid> = self.active.write().await.drain().map(|(sid, _)| sid).collect();
        for sid in sids {
            let _ = self.events.send(SessionEvent::SignedOut { sid });
        }
    }

    /// Drop sessions whose expiry has passed, signing each one out.
    ///
    /// `is_active` already answers `false` for them; this frees the entries
    /// and tears down their panel actors. Returns how many were collected.
    pub async fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let mut active = self.active.write().await;
            let mut expired = Vec::new();
            active.retain(|sid, expires_at| {
                let keep = !matches!(expires_at, Some(at) if *at <= now);
                if !keep {
                    expired.push(*sid);
                }
                keep
            });
            expired
        };

        for sid in &expired {
            tracing::info!("Session {} expired", sid);
            let _ = self.events.send(SessionEvent::SignedOut { sid: *sid });
        }
        expired.len()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared session registry type.
pub type SharedSessionRegistry = Arc<SessionRegistry>;

/// Collect expired sessions periodically for the life of the process.
pub fn spawn_reaper(registry: SharedSessionRegistry) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REAP_INTERVAL);
        loop {
            tick.tick().await;
            registry.reap_expired().await;
        }
    });
}
