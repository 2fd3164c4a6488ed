//! Process-local storage

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Storage;
use crate::Result;
use crate::session::{History, SessionId, Statistics};

/// Keeps records in memory only. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    histories: RwLock<HashMap<SessionId, History>>,
    statistics: RwLock<HashMap<SessionId, Statistics>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_history(&self, history: &History) -> Result<()> {
        self.histories
            .write()
            .await
            .insert(history.id.clone(), history.clone());
        Ok(())
    }

    async fn load_history(&self, id: &SessionId) -> Result<History> {
        let histories = self.histories.read().await;
        Ok(histories
            .get(id)
            .cloned()
            .unwrap_or_else(|| History::new(id.clone())))
    }

    async fn save_statistics(&self, statistics: &Statistics) -> Result<()> {
        self.statistics
            .write()
            .await
            .insert(statistics.id.clone(), statistics.clone());
        Ok(())
    }

    async fn load_statistics(&self, id: &SessionId) -> Result<Statistics> {
        let statistics = self.statistics.read().await;
        Ok(statistics
            .get(id)
            .cloned()
            .unwrap_or_else(|| Statistics::new(id.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Message;

    #[tokio::test]
    async fn test_round_trip() {
        let storage = MemoryStorage::new();
        let id = SessionId::new(1, 2, "gpt-4");
        assert!(storage.load_history(&id).await.unwrap().is_empty());

        let mut history = History::new(id.clone());
        history.add(Message::new("q", "a"));
        storage.save_history(&history).await.unwrap();

        assert_eq!(storage.load_history(&id).await.unwrap(), history);
    }
}
