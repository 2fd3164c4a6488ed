//! JSON-file storage

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::Storage;
use crate::Result;
use crate::session::{History, SessionId, Statistics};

/// Stores each history and statistics record as its own pretty-printed JSON
/// file under `base_dir`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path(&self, kind: &str, id: &SessionId) -> PathBuf {
        self.base_dir.join(format!(
            "{}-{}-{}-{}.json",
            kind,
            id.user,
            id.chat,
            encode_model(&id.model)
        ))
    }

    /// Write to a sibling temp file, then rename it over the record so a
    /// crash never leaves a half-written document behind.
    async fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let json = serde_json::to_vec_pretty(value)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), "Saved record");
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Percent-encode everything outside `[A-Za-z0-9._-]` so a model name such as
/// `openai/gpt-4o` stays a single file name. Plain names are left as they are.
fn encode_model(model: &str) -> String {
    let mut encoded = String::with_capacity(model.len());
    for byte in model.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[async_trait]
impl Storage for FsStorage {
    async fn save_history(&self, history: &History) -> Result<()> {
        self.write(&self.path("history", &history.id), history).await
    }

    async fn load_history(&self, id: &SessionId) -> Result<History> {
        let history = self.read(&self.path("history", id)).await?;
        Ok(history.unwrap_or_else(|| History::new(id.clone())))
    }

    async fn save_statistics(&self, statistics: &Statistics) -> Result<()> {
        self.write(&self.path("statistics", &statistics.id), statistics)
            .await
    }

    async fn load_statistics(&self, id: &SessionId) -> Result<Statistics> {
        let statistics = self.read(&self.path("statistics", id)).await?;
        Ok(statistics.unwrap_or_else(|| Statistics::new(id.clone())))
    }
}
