//! Task list view-model - one identity's live projection and its operations.
//!
//! A `TaskPanel` owns exactly one live feed scoped to one identity and keeps
//! a local projection of that identity's tasks, newest first. Mutations go
//! to the store and nowhere else: the projection only changes when the feed
//! pushes the next full result set, so what the user sees is always what the
//! store acknowledged (pessimistic updates).
//!
//! The panel also carries the editing selection and the form draft, so the
//! whole form state survives a failed write and the user can retry.

pub mod hub;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::accounts::Identity;
use crate::store::{StoreError, Task, TaskFeed, TaskStore};

// ─────────────────────────────────────────────────────────────────────────────
// Errors & Change Events
// ─────────────────────────────────────────────────────────────────────────────

/// What a panel operation can fail with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PanelError {
    /// Input was empty after trimming; no store call was made.
    #[error("task text must not be empty")]
    EmptyText,
    /// The id is not part of the current projection.
    #[error("unknown task {0}")]
    UnknownTask(Uuid),
    /// An update was submitted for an id that is not the current selection.
    #[error("no matching edit in progress")]
    NotEditing,
    /// The store rejected or could not perform the mutation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of waiting on the live feed.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelChange {
    /// A fresh result set replaced the projection.
    Updated,
    /// The feed failed or ended; the projection is no longer live.
    Lost(StoreError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot Types
// ─────────────────────────────────────────────────────────────────────────────

/// One row of the rendered list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    /// 1-based position in the current order. Presentation only, recomputed
    /// on every snapshot; never an identifier.
    pub position: usize,
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// The record currently loaded into the edit form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedTask {
    pub id: Uuid,
    pub text: String,
}

/// Everything a client needs to render the list and its form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelSnapshot {
    pub tasks: Vec<TaskView>,
    pub count: usize,
    pub editing: Option<SelectedTask>,
    pub draft: String,
    /// `false` once the live feed is gone; the list may be stale.
    pub live: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Panel
// ─────────────────────────────────────────────────────────────────────────────

/// The per-identity task list view-model.
pub struct TaskPanel {
    store: Arc<dyn TaskStore>,
    identity: Identity,
    feed: TaskFeed,
    tasks: Vec<Task>,
    editing: Option<Task>,
    draft: String,
    live: bool,
}

impl TaskPanel {
    /// Open a panel for one identity and subscribe to its tasks.
    ///
    /// The projection starts empty; the feed delivers the first full result
    /// set through [`next_change`](Self::next_change).
    pub async fn open(store: Arc<dyn TaskStore>, identity: Identity) -> Self {
        let feed = store.subscribe(&identity.uid).await;
        Self {
            store,
            identity,
            feed,
            tasks: Vec::new(),
            editing: None,
            draft: String::new(),
            live: true,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether the live feed is still attached.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Submit the form: updates the selected task if one is being edited,
    /// creates a new task otherwise.
    pub async fn submit(&mut self, text: &str) -> Result<(), PanelError> {
        match self.editing.as_ref().map(|t| t.id) {
            Some(id) => self.submit_update(id, text).await,
            None => self.submit_create(text).await,
        }
    }

    /// Create a new task from the form input.
    ///
    /// The raw input becomes the draft before anything else, so a failed
    /// attempt leaves the user's text in place. The draft is cleared only
    /// once the store acknowledges the write; the task itself appears via
    /// the next feed push.
    pub async fn submit_create(&mut self, text: &str) -> Result<(), PanelError> {
        self.draft = text.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PanelError::EmptyText);
        }
        self.store.create(&self.identity.uid, trimmed).await?;
        self.draft.clear();
        Ok(())
    }

    /// Overwrite the selected task's text.
    ///
    /// Fails with [`PanelError::NotEditing`] unless `id` is the current
    /// selection. On success the selection returns to create mode; on
    /// failure selection and draft stay put for a retry.
    pub async fn submit_update(&mut self, id: Uuid, text: &str) -> Result<(), PanelError> {
        self.draft = text.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PanelError::EmptyText);
        }
        if self.editing.as_ref().map(|t| t.id) != Some(id) {
            return Err(PanelError::NotEditing);
        }
        self.store.update(&self.identity.uid, id, trimmed).await?;
        self.editing = None;
        self.draft.clear();
        Ok(())
    }

    /// Load a task from the current projection into the edit form.
    ///
    /// Purely local: the id is resolved against the projection, so a stale
    /// id fails fast with [`PanelError::UnknownTask`] instead of reaching
    /// the store.
    pub fn begin_edit(&mut self, id: Uuid) -> Result<(), PanelError> {
        let task = self
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(PanelError::UnknownTask(id))?;
        self.draft = task.text.clone();
        self.editing = Some(task);
        Ok(())
    }

    /// Drop the selection and clear the form. Purely local.
    pub fn cancel_edit(&mut self) {
        self.editing = None;
        self.draft.clear();
    }

    /// Delete a task at the store.
    ///
    /// The row disappears from the projection with the next push. If the
    /// deleted task was being edited the selection resets; the draft is
    /// left as typed.
    pub async fn remove(&mut self, id: Uuid) -> Result<(), PanelError> {
        self.store.delete(&self.identity.uid, id).await?;
        if self.editing.as_ref().map(|t| t.id) == Some(id) {
            self.editing = None;
        }
        Ok(())
    }

    /// Swap the panel over to a different identity.
    ///
    /// The old feed is closed before the new subscription opens, so a push
    /// for the previous identity can never land in the new projection.
    pub async fn rebind(&mut self, identity: Identity) {
        self.feed.close();
        self.identity = identity;
        self.tasks.clear();
        self.editing = None;
        self.draft.clear();
        self.live = true;
        self.feed = self.store.subscribe(&self.identity.uid).await;
    }

    /// Wait for the next feed event and fold it into the panel.
    ///
    /// A push replaces the projection wholesale. An error or the end of the
    /// feed marks the panel not live; the stale projection stays visible but
    /// no further pushes will arrive until a rebind.
    pub async fn next_change(&mut self) -> PanelChange {
        match self.feed.next().await {
            Some(Ok(tasks)) => {
                self.tasks = tasks;
                PanelChange::Updated
            }
            Some(Err(e)) => {
                self.live = false;
                PanelChange::Lost(e)
            }
            None => {
                self.live = false;
                PanelChange::Lost(StoreError::Unavailable("task feed closed".into()))
            }
        }
    }

    /// Render the current panel state.
    pub fn snapshot(&self) -> PanelSnapshot {
        let tasks: Vec<TaskView> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| TaskView {
                position: i + 1,
                id: t.id,
                text: t.text.clone(),
                created_at: t.created_at,
                updated_at: t.updated_at,
            })
            .collect();

        PanelSnapshot {
            count: tasks.len(),
            tasks,
            editing: self.editing.as_ref().map(|t| SelectedTask {
                id: t.id,
                text: t.text.clone(),
            }),
            draft: self.draft.clone(),
            live: self.live,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
