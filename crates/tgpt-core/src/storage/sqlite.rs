//! Session persistence using SQLite

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::Storage;
use crate::session::{History, SessionId, Statistics};
use crate::{Error, Result};

/// SQLite-based storage. Each record is kept as a JSON document keyed by
/// `(user_id, chat_id, model)`.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("sqlite connection mutex poisoned".to_string()))
    }

    fn save_document(&self, table: Table, id: &SessionId, document: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (user_id, chat_id, model, document, updated_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))",
                table.name()
            ),
            params![id.user, id.chat, id.model, document],
        )?;
        Ok(())
    }

    fn load_document(&self, table: Table, id: &SessionId) -> Result<Option<String>> {
        let conn = self.conn()?;
        let document = conn
            .query_row(
                &format!(
                    "SELECT document FROM {} WHERE user_id = ?1 AND chat_id = ?2 AND model = ?3",
                    table.name()
                ),
                params![id.user, id.chat, id.model],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(document)
    }
}

#[derive(Clone, Copy)]
enum Table {
    Histories,
    Statistics,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Histories => "histories",
            Table::Statistics => "statistics",
        }
    }
}

/// Initialize database tables
fn init_tables(conn: &Connection) -> Result<()> {
    for table in [Table::Histories, Table::Statistics] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    user_id INTEGER NOT NULL,
                    chat_id INTEGER NOT NULL,
                    model TEXT NOT NULL,
                    document TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, chat_id, model)
                )",
                table.name()
            ),
            [],
        )?;
    }
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_history(&self, history: &History) -> Result<()> {
        let document = serde_json::to_string(history)?;
        self.save_document(Table::Histories, &history.id, &document)
    }

    async fn load_history(&self, id: &SessionId) -> Result<History> {
        match self.load_document(Table::Histories, id)? {
            Some(document) => Ok(serde_json::from_str(&document)?),
            None => Ok(History::new(id.clone())),
        }
    }

    async fn save_statistics(&self, statistics: &Statistics) -> Result<()> {
        let document = serde_json::to_string(statistics)?;
        self.save_document(Table::Statistics, &statistics.id, &document)
    }

    async fn load_statistics(&self, id: &SessionId) -> Result<Statistics> {
        match self.load_document(Table::Statistics, id)? {
            Some(document) => Ok(serde_json::from_str(&document)?),
            None => Ok(Statistics::new(id.clone())),
        }
    }
}
