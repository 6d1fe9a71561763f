use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{error, info};

use crate::error::StoreError;
use crate::models::{DB_VERSION, Db, Task, TaskId};

pub const DEFAULT_DB_PATH: &str = "data/db.json";

// Durable task records plus a live feed of the whole list.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // Assigns and returns a fresh id; the id on `task` is ignored.
    async fn insert(&self, task: Task) -> Result<TaskId, StoreError>;
    async fn update(&self, task: &Task) -> Result<(), StoreError>;
    // Ok(false) if there was no such record.
    async fn delete(&self, id: TaskId) -> Result<bool, StoreError>;
    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;
    async fn list(&self) -> Result<Vec<Task>, StoreError>;
    // Current snapshot, then a new one after every successful write.
    fn subscribe(&self) -> watch::Receiver<Vec<Task>>;
}

// Snapshot order: by scheduled time, unscheduled last, then by id.
fn snapshot(db: &Db) -> Vec<Task> {
    let mut tasks = db.tasks.clone();
    tasks.sort_by(|a, b| match (a.scheduled_time, b.scheduled_time) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
    tasks
}

pub fn load_db(path: &Path) -> Result<Db, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Db::default()),
        Err(e) => return Err(e.into()),
    };
    let mut db: Db = serde_json::from_str(&text)?;

    // ids are never reused, even if the counter was lost
    let max_id = db.tasks.iter().map(|t| t.id).max().unwrap_or(0);
    db.next_id = db.next_id.max(max_id + 1).max(1);
    db.version = DB_VERSION;
    Ok(db)
}

pub async fn save_db(path: &Path, db: &Db) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(db)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tokio::fs::write(&tmp_path, text).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

// Task store backed by a single JSON file, rewritten atomically on each change.
pub struct JsonTaskStore {
    path: PathBuf,
    db: Mutex<Db>,
    tx: watch::Sender<Vec<Task>>,
}

impl JsonTaskStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let db = load_db(&path)?;
        info!(path = %path.display(), tasks = db.tasks.len(), "task store opened");

        let (tx, _) = watch::channel(snapshot(&db));
        Ok(Self {
            path,
            db: Mutex::new(db),
            tx,
        })
    }

    // Persist `next` and only then make it the current state.
    async fn commit(&self, current: &mut Db, next: Db) -> Result<(), StoreError> {
        if let Err(e) = save_db(&self.path, &next).await {
            error!(path = %self.path.display(), error = %e, "failed to save task store");
            return Err(e);
        }
        *current = next;
        self.tx.send_replace(snapshot(current));
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn insert(&self, mut task: Task) -> Result<TaskId, StoreError> {
        let mut db = self.db.lock().await;
        let mut next = db.clone();

        task.id = next.next_id;
        next.next_id += 1;
        let id = task.id;
        next.tasks.push(task);

        self.commit(&mut db, next).await?;
        Ok(id)
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        let mut next = db.clone();

        let Some(slot) = next.tasks.iter_mut().find(|t| t.id == task.id) else {
            return Err(StoreError::NotFound(task.id));
        };
        *slot = task.clone();

        self.commit(&mut db, next).await
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let mut db = self.db.lock().await;
        let mut next = db.clone();

        let before = next.tasks.len();
        next.tasks.retain(|t| t.id != id);
        if next.tasks.len() == before {
            return Ok(false);
        }

        self.commit(&mut db, next).await?;
        Ok(true)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let db = self.db.lock().await;
        Ok(db.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let db = self.db.lock().await;
        Ok(snapshot(&db))
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    // In-memory store with switchable write failures and an optional pause
    // before a delete takes effect.
    pub struct MemoryStore {
        db: Mutex<Db>,
        tx: watch::Sender<Vec<Task>>,
        fail_writes: AtomicBool,
        delete_delay: std::sync::Mutex<Option<Duration>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            let db = Db::default();
            let (tx, _) = watch::channel(snapshot(&db));
            Self {
                db: Mutex::new(db),
                tx,
                fail_writes: AtomicBool::new(false),
                delete_delay: std::sync::Mutex::new(None),
            }
        }

        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn delay_deletes(&self, delay: Duration) {
            *self.delete_delay.lock().unwrap() = Some(delay);
        }

        fn check_writable(&self) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }

        // Put a record in as-is, bypassing id assignment (simulates data
        // left over from an earlier run).
        pub async fn seed(&self, task: Task) {
            let mut db = self.db.lock().await;
            db.next_id = db.next_id.max(task.id + 1);
            db.tasks.push(task);
            self.tx.send_replace(snapshot(&db));
        }
    }

    #[async_trait]
    impl TaskStore for MemoryStore {
        async fn insert(&self, mut task: Task) -> Result<TaskId, StoreError> {
            self.check_writable()?;
            let mut db = self.db.lock().await;
            task.id = db.next_id;
            db.next_id += 1;
            let id = task.id;
            db.tasks.push(task);
            self.tx.send_replace(snapshot(&db));
            Ok(id)
        }

        async fn update(&self, task: &Task) -> Result<(), StoreError> {
            self.check_writable()?;
            let mut db = self.db.lock().await;
            let Some(slot) = db.tasks.iter_mut().find(|t| t.id == task.id) else {
                return Err(StoreError::NotFound(task.id));
            };
            *slot = task.clone();
            self.tx.send_replace(snapshot(&db));
            Ok(())
        }

        async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
            self.check_writable()?;
            let delay = *self.delete_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut db = self.db.lock().await;
            let before = db.tasks.len();
            db.tasks.retain(|t| t.id != id);
            let removed = db.tasks.len() != before;
            if removed {
                self.tx.send_replace(snapshot(&db));
            }
            Ok(removed)
        }

        async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            Ok(self.db.lock().await.tasks.iter().find(|t| t.id == id).cloned())
        }

        async fn list(&self) -> Result<Vec<Task>, StoreError> {
            Ok(snapshot(&*self.db.lock().await))
        }

        fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
            self.tx.subscribe()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TaskStatus};
    use chrono::{DateTime, Utc};

    fn task(title: &str, at: Option<&str>) -> Task {
        Task {
            id: 0,
            title: title.to_string(),
            details: String::new(),
            category: "General".to_string(),
            priority: Priority::Medium,
            scheduled_time: at.map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .unwrap()
                    .with_timezone(&Utc)
            }),
            status: TaskStatus::Active,
        }
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");

        let store = JsonTaskStore::open(&path).unwrap();
        let a = store.insert(task("a", None)).await.unwrap();
        let b = store.insert(task("b", None)).await.unwrap();
        assert_eq!((a, b), (1, 2));

        store.delete(b).await.unwrap();
        drop(store);

        // deleted ids are not handed out again after a restart
        let reopened = JsonTaskStore::open(&path).unwrap();
        let c = reopened.insert(task("c", None)).await.unwrap();
        assert_eq!(c, 3);
        assert_eq!(reopened.get(a).await.unwrap().unwrap().title, "a");
        assert!(reopened.get(b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_and_delete_work_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTaskStore::open(dir.path().join("db.json")).unwrap();

        let id = store.insert(task("draft", None)).await.unwrap();
        let mut edited = store.get(id).await.unwrap().unwrap();
        edited.title = "final".into();
        store.update(&edited).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().title, "final");

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());

        let mut ghost = edited.clone();
        ghost.id = 99;
        assert!(matches!(
            store.update(&ghost).await,
            Err(StoreError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn subscribers_see_each_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTaskStore::open(dir.path().join("db.json")).unwrap();
        let mut rx = store.subscribe();
        assert!(rx.borrow().is_empty());

        store
            .insert(task("later", Some("2026-02-02T10:00:00Z")))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.insert(task("unscheduled", None)).await.unwrap();
        store
            .insert(task("sooner", Some("2026-02-01T10:00:00Z")))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        let titles: Vec<String> = rx.borrow().iter().map(|t| t.title.clone()).collect();
        assert_eq!(titles, vec!["sooner", "later", "unscheduled"]);
    }

    #[tokio::test]
    async fn loads_legacy_file_without_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            r#"{"tasks":[{"id":4,"title":"old","scheduledTimeMillis":1700000000000,"priority":"HIGH","status":"COMPLETED"}]}"#,
        )
        .unwrap();

        let store = JsonTaskStore::open(&path).unwrap();
        let old = store.get(4).await.unwrap().unwrap();
        assert_eq!(old.priority, Priority::High);
        assert_eq!(old.status, TaskStatus::Completed);
        assert_eq!(store.insert(task("new", None)).await.unwrap(), 5);
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            JsonTaskStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
