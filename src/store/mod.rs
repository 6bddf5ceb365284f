//! Persistent key-value store backed by SQLite.
//!
//! A single worker thread owns the connection; callers submit closures over a
//! channel and receive results through a oneshot. Commands are executed in the
//! order they were enqueued, so callers that snapshot state and enqueue the
//! write before releasing their own lock get write ordering that matches
//! mutation ordering.

use std::{
    path::PathBuf,
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;

pub mod keys;

const SCHEMA_VERSION: i32 = 1;

/// Values are JSON documents keyed like the settings surface expects.
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

fn ensure_schema(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    if version > SCHEMA_VERSION {
        bail!("store version ({version}) is newer than supported schema ({SCHEMA_VERSION})");
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(SCHEMA).context("failed to create kv table")?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    Ok(())
}

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// A write or read that has been handed to the store thread.
///
/// The command is already queued when this value exists; awaiting it only
/// observes the outcome.
#[must_use = "dropping a Pending discards the persistence result"]
pub struct Pending<T> {
    reply: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    fn ready(result: Result<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { reply: rx }
    }

    pub async fn wait(self) -> Result<T> {
        self.reply
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    location: Arc<String>,
}

impl Store {
    /// Open (or create) the store file at `path`.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let location = path.display().to_string();
        Self::spawn(location, move || Connection::open(&path))
    }

    /// Store that lives only as long as this handle. Used by tests and by
    /// hosts that persist elsewhere.
    pub fn open_in_memory() -> Result<Self> {
        Self::spawn(":memory:".to_string(), Connection::open_in_memory)
    }

    fn spawn<F>(location: String, open: F) -> Result<Self>
    where
        F: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("reelaware-store".into())
            .spawn(move || {
                let mut conn = match open() {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite store")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                }) {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = ensure_schema(&conn).context("failed to prepare store schema");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .context("failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Store initialized at {location}");

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Some(worker),
            }),
            location: Arc::new(location),
        })
    }

    pub fn location(&self) -> &str {
        self.location.as_str()
    }

    /// Queue `task` on the store thread immediately and return a handle to
    /// its result.
    pub fn enqueue<F, T>(&self, task: F) -> Pending<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        if let Err(err) = self.inner.sender.send(command) {
            return Pending::ready(Err(anyhow!("failed to send command to store thread: {err}")));
        }

        Pending { reply: reply_rx }
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(task).wait().await
    }

    /// Queue a write of `value` under `key`, replacing whatever was there.
    pub fn put<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Pending<()> {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                return Pending::ready(Err(
                    anyhow::Error::new(err).context(format!("failed to encode value for {key}"))
                ))
            }
        };
        let key = key.to_string();
        self.enqueue(move |conn| {
            upsert(conn, &key, &encoded)?;
            Ok(())
        })
    }

    /// Queue several writes applied atomically.
    pub fn put_many(&self, entries: Vec<(&'static str, serde_json::Value)>) -> Pending<()> {
        self.enqueue(move |conn| {
            let tx = conn.transaction().context("failed to open write transaction")?;
            for (key, value) in &entries {
                upsert(&tx, key, &value.to_string())?;
            }
            tx.commit().context("failed to commit writes")?;
            Ok(())
        })
    }

    pub async fn get<V>(&self, key: &str) -> Result<Option<V>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .with_context(|| format!("failed to read {key}"))?;

            raw.map(|raw| {
                serde_json::from_str(&raw).with_context(|| format!("failed to decode {key}"))
            })
            .transpose()
        })
        .await
    }

    /// Delete every key except those in `keep`.
    pub fn clear_except(&self, keep: &'static [&'static str]) -> Pending<usize> {
        self.enqueue(move |conn| {
            let existing: Vec<String> = {
                let mut stmt = conn.prepare("SELECT key FROM kv")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut removed = 0;
            for key in existing.iter().filter(|key| !keep.contains(&key.as_str())) {
                removed += conn
                    .execute("DELETE FROM kv WHERE key = ?1", params![key])
                    .with_context(|| format!("failed to delete {key}"))?;
            }
            Ok(removed)
        })
    }
}

fn upsert(conn: &Connection, key: &str, encoded: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, encoded, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write {key}"))?;
    Ok(())
}
