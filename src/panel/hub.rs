//! Per-session panel actors.
//!
//! Each active session gets one tokio task that owns its [`TaskPanel`]
//! exclusively, so panel operations serialize and the live feed has exactly
//! one consumer. Handlers talk to the actor through a command channel and
//! observe it through a watch channel of published snapshots; the actor
//! exits (dropping panel, feed and publisher) when its session signs out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use uuid::Uuid;

use crate::accounts::Identity;
use crate::sessions::{SessionEvent, SharedSessionRegistry};
use crate::store::{StoreError, TaskStore};

use super::{PanelChange, PanelError, PanelSnapshot, TaskPanel};

/// Queued user actions per session before senders have to wait.
const COMMAND_BUFFER: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Commands & Handles
// ─────────────────────────────────────────────────────────────────────────────

/// One user action, carrying a channel for the outcome.
pub enum PanelCommand {
    Submit {
        text: String,
        respond: oneshot::Sender<Result<(), PanelError>>,
    },
    BeginEdit {
        id: Uuid,
        respond: oneshot::Sender<Result<(), PanelError>>,
    },
    CancelEdit {
        respond: oneshot::Sender<()>,
    },
    Remove {
        id: Uuid,
        respond: oneshot::Sender<Result<(), PanelError>>,
    },
}

/// Client side of one session's panel actor.
#[derive(Clone)]
pub struct PanelHandle {
    cmd_tx: mpsc::Sender<PanelCommand>,
    state_rx: watch::Receiver<PanelSnapshot>,
}

impl PanelHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> PanelSnapshot {
        self.state_rx.borrow().clone()
    }

    /// A fresh receiver for following snapshot updates.
    pub fn watch(&self) -> watch::Receiver<PanelSnapshot> {
        self.state_rx.clone()
    }

    /// Submit the form (create or update, per the current selection).
    pub async fn submit(&self, text: String) -> Result<(), PanelError> {
        let (respond, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(PanelCommand::Submit { text, respond })
            .await
            .is_err()
        {
            return Err(session_gone());
        }
        rx.await.unwrap_or_else(|_| Err(session_gone()))
    }

    pub async fn begin_edit(&self, id: Uuid) -> Result<(), PanelError> {
        let (respond, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(PanelCommand::BeginEdit { id, respond })
            .await
            .is_err()
        {
            return Err(session_gone());
        }
        rx.await.unwrap_or_else(|_| Err(session_gone()))
    }

    pub async fn cancel_edit(&self) -> Result<(), PanelError> {
        let (respond, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(PanelCommand::CancelEdit { respond })
            .await
            .is_err()
        {
            return Err(session_gone());
        }
        rx.await.map_err(|_| session_gone())
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), PanelError> {
        let (respond, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(PanelCommand::Remove { id, respond })
            .await
            .is_err()
        {
            return Err(session_gone());
        }
        rx.await.unwrap_or_else(|_| Err(session_gone()))
    }
}

/// The actor disappeared mid-call (sign-out race). Surfaces like any other
/// store outage; the client re-authenticates and retries.
fn session_gone() -> PanelError {
    PanelError::Store(StoreError::Unavailable("session closed".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Hub
// ─────────────────────────────────────────────────────────────────────────────

/// Owns one panel actor per active session.
pub struct PanelHub {
    store: Arc<dyn TaskStore>,
    registry: SharedSessionRegistry,
    panels: Arc<RwLock<HashMap<Uuid, PanelHandle>>>,
}

pub type SharedPanelHub = Arc<PanelHub>;

impl PanelHub {
    pub fn new(store: Arc<dyn TaskStore>, registry: SharedSessionRegistry) -> Self {
        Self {
            store,
            registry,
            panels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle for a session's panel, spawning the actor on first use.
    pub async fn panel(&self, sid: Uuid, identity: Identity) -> PanelHandle {
        if let Some(handle) = self.panels.read().await.get(&sid) {
            return handle.clone();
        }

        let mut panels = self.panels.write().await;
        // Raced another caller for the same session; use theirs.
        if let Some(handle) = panels.get(&sid) {
            return handle.clone();
        }

        let handle = self.spawn_actor(sid, identity).await;
        panels.insert(sid, handle.clone());
        handle
    }

    async fn spawn_actor(&self, sid: Uuid, identity: Identity) -> PanelHandle {
        let mut panel = TaskPanel::open(self.store.clone(), identity).await;
        let (state_tx, state_rx) = watch::channel(panel.snapshot());
        let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        // Subscribe before the activity check below, so a sign-out can never
        // fall between the two.
        let mut signout_rx = self.registry.subscribe();
        let registry = self.registry.clone();
        let panels = self.panels.clone();

        tokio::spawn(async move {
            if !registry.is_active(sid).await {
                // Signed out between the gate check and the spawn.
                panels.write().await.remove(&sid);
                return;
            }
            tracing::info!("Panel actor for session {} started", sid);

            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(cmd) => {
                                run_command(&mut panel, cmd).await;
                                let _ = state_tx.send(panel.snapshot());
                            }
                            None => break,
                        }
                    }
                    change = panel.next_change(), if panel.is_live() => {
                        if let PanelChange::Lost(e) = change {
                            tracing::warn!("Live feed lost for session {}: {}", sid, e);
                        }
                        let _ = state_tx.send(panel.snapshot());
                    }
                    event = signout_rx.recv() => {
                        match event {
                            Ok(SessionEvent::SignedOut { sid: closed }) if closed == sid => break,
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(_)) => {
                                // Missed events; re-check directly.
                                if !registry.is_active(sid).await {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            panels.write().await.remove(&sid);
            tracing::info!("Panel actor for session {} stopped", sid);
            // Dropping the panel releases its feed; dropping the state
            // sender ends every attached snapshot stream.
        });

        PanelHandle { cmd_tx, state_rx }
    }
}

async fn run_command(panel: &mut TaskPanel, cmd: PanelCommand) {
    match cmd {
        PanelCommand::Submit { text, respond } => {
            let _ = respond.send(panel.submit(&text).await);
        }
        PanelCommand::BeginEdit { id, respond } => {
            let _ = respond.send(panel.begin_edit(id));
        }
        PanelCommand::CancelEdit { respond } => {
            panel.cancel_edit();
            let _ = respond.send(());
        }
        PanelCommand::Remove { id, respond } => {
            let _ = respond.send(panel.remove(id).await);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRegistry;
    use crate::store::SqliteTaskStore;

    fn identity(uid: &str) -> Identity {
        Identity {
            uid: uid.to_string(),
            email: format!("{}@example.com", uid),
        }
    }

    fn test_hub() -> (PanelHub, SharedSessionRegistry, SqliteTaskStore) {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let hub = PanelHub::new(Arc::new(store.clone()), registry.clone());
        (hub, registry, store)
    }

    /// Follows published snapshots until one satisfies the predicate.
    async fn wait_for<F>(rx: &mut watch::Receiver<PanelSnapshot>, pred: F) -> PanelSnapshot
    where
        F: Fn(&PanelSnapshot) -> bool,
    {
        loop {
            {
                let snap = rx.borrow_and_update();
                if pred(&snap) {
                    return snap.clone();
                }
            }
            rx.changed().await.expect("snapshot publisher dropped");
        }
    }

    #[tokio::test]
    async fn commands_flow_through_the_actor() {
        let (hub, registry, _store) = test_hub();
        let sid = Uuid::new_v4();
        registry.open(sid, None).await;

        let handle = hub.panel(sid, identity("u1")).await;
        let mut rx = handle.watch();

        handle.submit("Buy milk".into()).await.unwrap();
        let snap = wait_for(&mut rx, |s| s.count == 1).await;
        assert_eq!(snap.tasks[0].text, "Buy milk");

        // Same session id resolves to the same actor.
        let again = hub.panel(sid, identity("u1")).await;
        assert_eq!(again.snapshot().count, 1);
    }

    #[tokio::test]
    async fn edit_commands_round_trip() {
        let (hub, registry, _store) = test_hub();
        let sid = Uuid::new_v4();
        registry.open(sid, None).await;
        let handle = hub.panel(sid, identity("u1")).await;
        let mut rx = handle.watch();

        handle.submit("Buy milk".into()).await.unwrap();
        let snap = wait_for(&mut rx, |s| s.count == 1).await;
        let id = snap.tasks[0].id;

        let bogus = Uuid::new_v4();
        assert!(matches!(
            handle.begin_edit(bogus).await,
            Err(PanelError::UnknownTask(_))
        ));

        handle.begin_edit(id).await.unwrap();
        let snap = wait_for(&mut rx, |s| s.editing.is_some()).await;
        assert_eq!(snap.draft, "Buy milk");

        handle.submit("Buy oat milk".into()).await.unwrap();
        let snap = wait_for(&mut rx, |s| {
            s.editing.is_none() && s.count == 1 && s.tasks[0].text == "Buy oat milk"
        })
        .await;
        assert!(snap.tasks[0].updated_at.is_some());

        handle.remove(id).await.unwrap();
        wait_for(&mut rx, |s| s.count == 0).await;
    }

    #[tokio::test]
    async fn panels_are_isolated_per_identity() {
        let (hub, registry, store) = test_hub();
        store.create("u2", "theirs").await.unwrap();

        let sid = Uuid::new_v4();
        registry.open(sid, None).await;
        let handle = hub.panel(sid, identity("u1")).await;
        let mut rx = handle.watch();

        handle.submit("mine".into()).await.unwrap();
        let snap = wait_for(&mut rx, |s| s.count == 1).await;
        assert_eq!(snap.tasks[0].text, "mine");
    }

    #[tokio::test]
    async fn signout_stops_the_actor() {
        let (hub, registry, _store) = test_hub();
        let sid = Uuid::new_v4();
        registry.open(sid, None).await;

        let handle = hub.panel(sid, identity("u1")).await;
        let mut rx = handle.watch();
        wait_for(&mut rx, |s| s.live && s.count == 0).await;

        registry.close(sid).await;

        // The publisher drops with the actor; changed() then errors.
        while rx.changed().await.is_ok() {}
        assert!(handle.submit("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn reaping_an_expired_session_stops_its_actor() {
        let (hub, registry, _store) = test_hub();
        let sid = Uuid::new_v4();
        registry
            .open(sid, Some(chrono::Utc::now() + chrono::Duration::milliseconds(50)))
            .await;

        let handle = hub.panel(sid, identity("u1")).await;
        let mut rx = handle.watch();
        wait_for(&mut rx, |s| s.live).await;

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(registry.reap_expired().await, 1);

        // The actor exits on the sign-out event; its publisher drops with it.
        while rx.changed().await.is_ok() {}
        assert!(handle.submit("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn actor_refuses_a_dead_session() {
        let (hub, _registry, _store) = test_hub();
        // Never opened in the registry.
        let sid = Uuid::new_v4();

        let handle = hub.panel(sid, identity("u1")).await;
        assert!(handle.submit("x".into()).await.is_err());
    }
}
