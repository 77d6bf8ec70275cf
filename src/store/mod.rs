//! Task storage.
//!
//! Defines the task record, the store trait the rest of the service codes
//! against, and the live feed handed out by `subscribe`. The SQLite-backed
//! implementation lives in [`sqlite`].

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub use sqlite::SqliteTaskStore;

/// A single task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, assigned by the store at creation
    pub id: Uuid,
    /// Identity of the owning user; set once, never edited
    pub owner_uid: String,
    /// Task content
    pub text: String,
    /// Store-assigned creation time
    pub created_at: DateTime<Utc>,
    /// Store-assigned time of the last update; absent until the first update
    pub updated_at: Option<DateTime<Utc>>,
}

/// Errors from task store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("task store unavailable: {0}")]
    Unavailable(String),
}

/// A live feed of one owner's tasks.
///
/// Each push is the complete ordered result set, newest first. The feed IS
/// the subscription: dropping it (or calling [`close`](Self::close))
/// releases the underlying subscription and the producer stops.
pub struct TaskFeed {
    rx: mpsc::Receiver<Result<Vec<Task>, StoreError>>,
}

impl TaskFeed {
    pub fn new(rx: mpsc::Receiver<Result<Vec<Task>, StoreError>>) -> Self {
        Self { rx }
    }

    /// Await the next push. `None` means the feed has ended.
    pub async fn next(&mut self) -> Option<Result<Vec<Task>, StoreError>> {
        self.rx.recv().await
    }

    /// Release the subscription without consuming the handle.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Storage backend for task records.
///
/// Every operation carries the calling owner, and implementations must
/// scope reads and writes to it: a caller can never observe or touch
/// another owner's records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task; the store assigns the id and creation time.
    async fn create(&self, owner_uid: &str, text: &str) -> Result<Uuid, StoreError>;

    /// Overwrite a task's text and stamp `updated_at`. Fails with
    /// [`StoreError::NotFound`] when the id does not exist for this owner.
    async fn update(&self, owner_uid: &str, id: Uuid, text: &str) -> Result<(), StoreError>;

    /// Delete a task. Deleting an id that is already gone (or that belongs
    /// to someone else) is a successful no-op.
    async fn delete(&self, owner_uid: &str, id: Uuid) -> Result<(), StoreError>;

    /// The owner's tasks, ordered by creation time descending.
    async fn snapshot(&self, owner_uid: &str) -> Result<Vec<Task>, StoreError>;

    /// Open a live feed of the owner's tasks. The current snapshot is
    /// pushed immediately, then a fresh one after every relevant change.
    async fn subscribe(&self, owner_uid: &str) -> TaskFeed;
}
