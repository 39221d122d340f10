use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use super::{DocumentStore, deep_merge, split_document_path, validate_collection_path};
use crate::errors::{KalmaError, KalmaResult};

/// SQLite-backed document store: one row per document, JSON text payload.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> KalmaResult<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create database parent directory: {}",
                    parent.display()
                )
            })?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at: {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )
        .map_err(KalmaError::persistence)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        debug!("opened document store at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> KalmaResult<Self> {
        let conn = Connection::open_in_memory().map_err(KalmaError::persistence)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> KalmaResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                parent TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent, doc_id);",
        )
        .map_err(KalmaError::persistence)
    }

    fn lock(&self) -> KalmaResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KalmaError::Persistence(format!("DB lock poisoned: {e}")))
    }
}

fn read_doc(conn: &Connection, path: &str) -> KalmaResult<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()
        .map_err(KalmaError::persistence)?;
    raw.map(|s| serde_json::from_str(&s).map_err(KalmaError::persistence))
        .transpose()
}

fn write_doc(conn: &Connection, path: &str, value: &Value) -> KalmaResult<()> {
    let (parent, id) = split_document_path(path)?;
    let data = serde_json::to_string(value).map_err(KalmaError::persistence)?;
    conn.execute(
        "INSERT INTO documents (path, parent, doc_id, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![path, parent, id, data, Utc::now().to_rfc3339()],
    )
    .map_err(KalmaError::persistence)?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &str) -> KalmaResult<Option<Value>> {
        split_document_path(path)?;
        let conn = self.lock()?;
        read_doc(&conn, path)
    }

    async fn set(&self, path: &str, value: Value) -> KalmaResult<()> {
        let conn = self.lock()?;
        write_doc(&conn, path, &value)
    }

    async fn update(&self, path: &str, patch: Value) -> KalmaResult<()> {
        split_document_path(path)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(KalmaError::persistence)?;
        let mut doc = read_doc(&tx, path)?.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        deep_merge(&mut doc, patch);
        write_doc(&tx, path, &doc)?;
        tx.commit().map_err(KalmaError::persistence)
    }

    async fn list(&self, collection: &str) -> KalmaResult<Vec<(String, Value)>> {
        validate_collection_path(collection)?;
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT doc_id, data FROM documents WHERE parent = ?1 ORDER BY doc_id")
            .map_err(KalmaError::persistence)?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(KalmaError::persistence)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, data) = row.map_err(KalmaError::persistence)?;
            let value = serde_json::from_str(&data).map_err(KalmaError::persistence)?;
            out.push((id, value));
        }
        Ok(out)
    }
}
