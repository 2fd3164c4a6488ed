//! Durable storage for session history and statistics
//!
//! Backends must treat a missing record as "nothing yet" and hand back an
//! empty [`History`] or zeroed [`Statistics`] instead of an error.

mod fs;
mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::Result;
use crate::session::{History, SessionId, Statistics};

pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Key-value persistence keyed by [`SessionId`]
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_history(&self, history: &History) -> Result<()>;

    async fn load_history(&self, id: &SessionId) -> Result<History>;

    async fn save_statistics(&self, statistics: &Statistics) -> Result<()>;

    async fn load_statistics(&self, id: &SessionId) -> Result<Statistics>;
}
