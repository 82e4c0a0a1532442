//! Per-workflow cursor storage.
//!
//! The store is schema-less: string key → string value. Each detector
//! decides how to encode its own cursor (integer, RFC3339, JSON).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bugwarden_core::error::{BugwardenError, Result};
use rusqlite::{Connection, OptionalExtension};

/// Persistent string-keyed cursor state.
pub trait CursorStore: Send + Sync {
    /// Value under `key`, or an empty string when unset.
    fn get(&self, key: &str) -> Result<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, sorted by key.
    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// Build the configured backend. An unknown backend name fails here, at
/// construction, rather than on first use.
pub fn open_cursor_store(backend: &str, data_dir: &Path) -> Result<Arc<dyn CursorStore>> {
    match backend {
        "sqlite" => Ok(Arc::new(SqliteCursorStore::open(&data_dir.join("cursors.db"))?)),
        "memory" => Ok(Arc::new(MemoryCursorStore::new())),
        other => Err(BugwardenError::Config(format!(
            "unknown cursor backend '{other}' (expected 'sqlite' or 'memory')"
        ))),
    }
}

fn cursor_err(e: impl std::fmt::Display) -> BugwardenError {
    BugwardenError::Cursor(e.to_string())
}

// ─── SQLite ───────────────────────────────────────────────

/// SQLite-backed cursor store.
///
/// Every call opens its own connection in WAL mode, so readers never queue
/// behind another workflow's write and there is no process-wide lock.
pub struct SqliteCursorStore {
    path: PathBuf,
}

impl SqliteCursorStore {
    /// Open or create the cursor database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(cursor_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cursors (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(cursor_err)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(cursor_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(cursor_err)?;
        Ok(conn)
    }
}

impl CursorStore for SqliteCursorStore {
    fn get(&self, key: &str) -> Result<String> {
        let conn = self.connect()?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM cursors WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(cursor_err)?;
        Ok(value.unwrap_or_default())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO cursors (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(cursor_err)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM cursors WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .map_err(cursor_err)?;
        let rows = stmt
            .query_map([prefix], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(cursor_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(cursor_err)
    }
}

// ─── In-memory ────────────────────────────────────────────

/// Ephemeral cursor store. State is lost on restart.
#[derive(Default)]
pub struct MemoryCursorStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn get(&self, key: &str) -> Result<String> {
        let entries = self
            .entries
            .read()
            .map_err(|_| BugwardenError::Cursor("cursor map poisoned".into()))?;
        Ok(entries.get(key).cloned().unwrap_or_default())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BugwardenError::Cursor("cursor map poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| BugwardenError::Cursor("cursor map poisoned".into()))?;
        let mut out: Vec<_> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort();
        Ok(out)
    }
}

// ─── Scoped access ────────────────────────────────────────

/// Cursor access bound to one workflow: every key is `<scope>/<name>`.
#[derive(Clone)]
pub struct ScopedCursors {
    store: Arc<dyn CursorStore>,
    scope: String,
}

impl ScopedCursors {
    pub fn new(store: Arc<dyn CursorStore>, scope: &str) -> Self {
        Self {
            store,
            scope: scope.to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.scope, name)
    }

    pub fn read(&self, name: &str) -> Result<String> {
        self.store.get(&self.key(name))
    }

    pub fn write(&self, name: &str, value: &str) -> Result<()> {
        self.store.set(&self.key(name), value)
    }
}
