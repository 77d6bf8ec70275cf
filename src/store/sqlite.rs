//! SQLite-backed task store.
//!
//! A single connection behind a std `Mutex`; every statement runs inside a
//! short lock scope and the lock is never held across an await. Change
//! notification is a process-wide revision counter on a watch channel:
//! mutations bump it after the lock is released, and each subscriber's
//! forwarder task re-queries its owner's snapshot when the counter moves,
//! pushing only when the result actually differs.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::{StoreError, Task, TaskFeed, TaskStore};

/// Buffered pushes per feed before the producer awaits the consumer.
const FEED_BUFFER: usize = 8;

/// SQLite-backed implementation of [`TaskStore`].
#[derive(Clone)]
pub struct SqliteTaskStore {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
    revision: watch::Sender<u64>,
}

impl SqliteTaskStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create data dir: {}", e)))?;
        }
        let conn =
            Connection::open(path).map_err(|e| StoreError::Unavailable(format!("open: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        let (revision, _) = watch::channel(0u64);
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                revision,
            }),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                owner_uid TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_owner_created
                ON tasks(owner_uid, created_at DESC);
            ",
        )
        .map_err(|e| StoreError::Unavailable(format!("init_schema: {}", e)))?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.inner
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Signal subscribers that something committed.
    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    fn row_to_task(row: &rusqlite::Row<'_>) -> Result<Task, StoreError> {
        let id_str: String = row
            .get(0)
            .map_err(|e| StoreError::Unavailable(format!("row id: {}", e)))?;
        let id = Uuid::parse_str(&id_str)
            .map_err(|e| StoreError::Unavailable(format!("parse id: {}", e)))?;
        let owner_uid: String = row
            .get(1)
            .map_err(|e| StoreError::Unavailable(format!("row owner: {}", e)))?;
        let text: String = row
            .get(2)
            .map_err(|e| StoreError::Unavailable(format!("row text: {}", e)))?;
        let created_us: i64 = row
            .get(3)
            .map_err(|e| StoreError::Unavailable(format!("row created_at: {}", e)))?;
        let updated_us: Option<i64> = row
            .get(4)
            .map_err(|e| StoreError::Unavailable(format!("row updated_at: {}", e)))?;

        Ok(Task {
            id,
            owner_uid,
            text,
            created_at: from_micros(created_us),
            updated_at: updated_us.map(from_micros),
        })
    }
}

fn from_micros(us: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(us).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, owner_uid: &str, text: &str) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now().timestamp_micros();
        {
            let conn = self.lock_conn()?;
            conn.execute(
                "INSERT INTO tasks (id, owner_uid, text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                params![id.to_string(), owner_uid, text, created_at],
            )
            .map_err(|e| StoreError::Unavailable(format!("insert: {}", e)))?;
        }
        self.bump();
        Ok(id)
    }

    async fn update(&self, owner_uid: &str, id: Uuid, text: &str) -> Result<(), StoreError> {
        let updated_at = Utc::now().timestamp_micros();
        let rows = {
            let conn = self.lock_conn()?;
            conn.execute(
                "UPDATE tasks SET text = ?1, updated_at = ?2 WHERE id = ?3 AND owner_uid = ?4",
                params![text, updated_at, id.to_string(), owner_uid],
            )
            .map_err(|e| StoreError::Unavailable(format!("update: {}", e)))?
        };

        if rows == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.bump();
        Ok(())
    }

    async fn delete(&self, owner_uid: &str, id: Uuid) -> Result<(), StoreError> {
        let rows = {
            let conn = self.lock_conn()?;
            conn.execute(
                "DELETE FROM tasks WHERE id = ?1 AND owner_uid = ?2",
                params![id.to_string(), owner_uid],
            )
            .map_err(|e| StoreError::Unavailable(format!("delete: {}", e)))?
        };

        // Deleting an id that is already gone is a no-op, not an error.
        if rows > 0 {
            self.bump();
        }
        Ok(())
    }

    async fn snapshot(&self, owner_uid: &str) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, owner_uid, text, created_at, updated_at
                 FROM tasks WHERE owner_uid = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(|e| StoreError::Unavailable(format!("prepare snapshot: {}", e)))?;

        let rows = stmt
            .query_map(params![owner_uid], |row| Ok(Self::row_to_task(row)))
            .map_err(|e| StoreError::Unavailable(format!("query snapshot: {}", e)))?;

        let mut tasks = Vec::new();
        for row in rows {
            let task = row.map_err(|e| StoreError::Unavailable(format!("row: {}", e)))?;
            tasks.push(task?);
        }
        Ok(tasks)
    }

    async fn subscribe(&self, owner_uid: &str) -> TaskFeed {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let mut revision = self.inner.revision.subscribe();
        let store = self.clone();
        let owner = owner_uid.to_string();

        tokio::spawn(async move {
            let mut last: Option<Vec<Task>> = None;
            loop {
                match store.snapshot(&owner).await {
                    Ok(tasks) => {
                        // Revision bumps are global; only forward when this
                        // owner's result set actually changed.
                        if last.as_ref() != Some(&tasks) {
                            if tx.send(Ok(tasks.clone())).await.is_err() {
                                break;
                            }
                            last = Some(tasks);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Task feed query failed for {}: {}", owner, e);
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }

                tokio::select! {
                    _ = tx.closed() => break,
                    changed = revision.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        TaskFeed::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_snapshot_round_trip() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let id = store.create("u1", "Buy milk").await.unwrap();

        let tasks = store.snapshot("u1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].owner_uid, "u1");
        assert_eq!(tasks[0].text, "Buy milk");
        assert!(tasks[0].updated_at.is_none());
    }

    #[tokio::test]
    async fn snapshot_orders_newest_first() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        store.create("u1", "A").await.unwrap();
        store.create("u1", "B").await.unwrap();

        let tasks = store.snapshot("u1").await.unwrap();
        let texts: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["B", "A"]);
    }

    #[tokio::test]
    async fn update_keeps_creation_order() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let a = store.create("u1", "A").await.unwrap();
        store.create("u1", "B").await.unwrap();

        store.update("u1", a, "A2").await.unwrap();

        let tasks = store.snapshot("u1").await.unwrap();
        let texts: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["B", "A2"]);
        assert!(tasks[1].updated_at.is_some());
        assert!(tasks[0].updated_at.is_none());
    }

    #[tokio::test]
    async fn owner_scoping_is_enforced() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let id = store.create("u1", "Buy milk").await.unwrap();

        assert!(store.snapshot("u2").await.unwrap().is_empty());
        assert_eq!(
            store.update("u2", id, "stolen").await,
            Err(StoreError::NotFound(id))
        );

        // A foreign delete is a silent no-op; the record survives.
        store.delete("u2", id).await.unwrap();
        assert_eq!(store.snapshot("u1").await.unwrap().len(), 1);
        assert_eq!(store.snapshot("u1").await.unwrap()[0].text, "Buy milk");
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        assert_eq!(
            store.update("u1", id, "x").await,
            Err(StoreError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn delete_missing_is_a_no_op() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        store.delete("u1", Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_pushes_initial_then_changes() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let mut feed = store.subscribe("u1").await;

        let initial = feed.next().await.unwrap().unwrap();
        assert!(initial.is_empty());

        store.create("u1", "Buy milk").await.unwrap();
        let tasks = feed.next().await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "Buy milk");

        store.delete("u1", tasks[0].id).await.unwrap();
        let tasks = feed.next().await.unwrap().unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn feed_ignores_other_owners_changes() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let mut feed = store.subscribe("u1").await;
        feed.next().await.unwrap().unwrap();

        // A foreign write bumps the revision but must not surface here.
        store.create("u2", "theirs").await.unwrap();
        store.create("u1", "mine").await.unwrap();

        let tasks = feed.next().await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "mine");
    }

    #[tokio::test]
    async fn closing_the_feed_ends_it() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let mut feed = store.subscribe("u1").await;
        feed.next().await.unwrap().unwrap();

        feed.close();
        assert!(feed.next().await.is_none());

        // The store keeps working after a subscriber leaves.
        store.create("u1", "still fine").await.unwrap();
        assert_eq!(store.snapshot("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let id = {
            let store = SqliteTaskStore::open(&path).unwrap();
            store.create("u1", "Persist me").await.unwrap()
        };

        let store = SqliteTaskStore::open(&path).unwrap();
        let tasks = store.snapshot("u1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].text, "Persist me");
    }
}
