use anyhow::{bail, Context};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::persist::KeyValueStore;

pub const DB_FILE: &str = "lessonbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

/// Key-value storage on the workspace database, with a per-value size cap.
pub struct SqliteKv {
    conn: Connection,
    quota_bytes: usize,
}

impl SqliteKv {
    pub fn new(conn: Connection, quota_bytes: usize) -> Self {
        Self { conn, quota_bytes }
    }
}

impl KeyValueStore for SqliteKv {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |r| {
                r.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if value.len() > self.quota_bytes {
            bail!(
                "quota exceeded: {} needs {} bytes, limit is {}",
                key,
                value.len(),
                self.quota_bytes
            );
        }
        self.conn.execute(
            "INSERT INTO kv(key, value, updated_at) VALUES(?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (key, value, chrono::Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }
}
