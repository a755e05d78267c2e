use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

use super::DocumentStore;
use crate::document::{Document, DocumentId};

pub struct Database {
    pub conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening database at {}", path.display()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        // rowid gives the store's native (insertion) order for listing.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }
}

fn decode((id, title, content, created_at, updated_at): (String, String, String, String, String)) -> Result<Document> {
    Ok(Document {
        id: id.parse().with_context(|| format!("corrupt document id {id:?}"))?,
        title,
        content,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)?.into(),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)?.into(),
    })
}

impl DocumentStore for Database {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, title, content, created_at, updated_at
                 FROM documents WHERE id = ?1",
                params![id.to_string()],
                Self::read_row,
            )
            .optional()?;

        row.map(decode).transpose()
    }

    fn put(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE documents SET title = ?2, content = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                doc.id.to_string(),
                doc.title,
                doc.content,
                doc.updated_at.to_rfc3339(),
            ],
        )?;

        if changed == 0 {
            anyhow::bail!("document {} is not stored", doc.id);
        }
        Ok(())
    }

    fn insert(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, title, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                doc.id.to_string(),
                doc.title,
                doc.content,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, content, created_at, updated_at
             FROM documents
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(decode).collect()
    }
}
