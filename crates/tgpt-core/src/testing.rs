//! Test doubles for the storage and model collaborators

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::SystemClock;
use crate::cost::PriceTable;
use crate::llm::{Completion, CompletionClient, CompletionRequest, Role, Usage};
use crate::session::{History, SessionDeps, SessionId, Statistics};
use crate::storage::{MemoryStorage, Storage};
use crate::{Error, Result};

/// Deps wired with the default price table and the system clock
pub fn test_deps(client: Arc<dyn CompletionClient>, storage: Arc<dyn Storage>) -> SessionDeps {
    SessionDeps {
        client,
        storage,
        prices: Arc::new(PriceTable::default()),
        clock: Arc::new(SystemClock),
    }
}

/// In-memory storage that counts calls and can be told to fail
#[derive(Default)]
pub struct RecordingStorage {
    inner: MemoryStorage,
    history_loads: AtomicUsize,
    statistics_loads: AtomicUsize,
    history_saves: AtomicUsize,
    statistics_saves: AtomicUsize,
    fail_loads: AtomicBool,
    fail_statistics_saves: AtomicBool,
    seen_histories: Mutex<Vec<SessionId>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_statistics_saves(&self, fail: bool) {
        self.fail_statistics_saves.store(fail, Ordering::SeqCst);
    }

    pub fn history_loads(&self) -> usize {
        self.history_loads.load(Ordering::SeqCst)
    }

    pub fn statistics_loads(&self) -> usize {
        self.statistics_loads.load(Ordering::SeqCst)
    }

    pub fn history_saves(&self) -> usize {
        self.history_saves.load(Ordering::SeqCst)
    }

    pub fn statistics_saves(&self) -> usize {
        self.statistics_saves.load(Ordering::SeqCst)
    }

    /// History as last written, if ever
    pub async fn stored_history(&self, id: &SessionId) -> Option<History> {
        let saved = self
            .seen_histories
            .lock()
            .map(|seen| seen.contains(id))
            .unwrap_or(false);
        if !saved {
            return None;
        }
        self.inner.load_history(id).await.ok()
    }

    /// Statistics as last written, if ever
    pub async fn stored_statistics(&self, id: &SessionId) -> Option<Statistics> {
        let stats = self.inner.load_statistics(id).await.ok()?;
        (stats != Statistics::new(id.clone())).then_some(stats)
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn save_history(&self, history: &History) -> Result<()> {
        self.history_saves.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_histories.lock() {
            if !seen.contains(&history.id) {
                seen.push(history.id.clone());
            }
        }
        self.inner.save_history(history).await
    }

    async fn load_history(&self, id: &SessionId) -> Result<History> {
        self.history_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::Other("injected load failure".to_string()));
        }
        self.inner.load_history(id).await
    }

    async fn save_statistics(&self, statistics: &Statistics) -> Result<()> {
        self.statistics_saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_statistics_saves.load(Ordering::SeqCst) {
            return Err(Error::Other("injected save failure".to_string()));
        }
        self.inner.save_statistics(statistics).await
    }

    async fn load_statistics(&self, id: &SessionId) -> Result<Statistics> {
        self.statistics_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::Other("injected load failure".to_string()));
        }
        self.inner.load_statistics(id).await
    }
}

/// Completion client that echoes the last user message
pub struct ScriptedClient {
    usage: Usage,
    delay: Duration,
    failures: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    /// Replies cost 1,000 input and 1,000 output tokens each
    pub fn new() -> Self {
        Self {
            usage: Usage::new(1000, 1000),
            delay: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Sleep this long inside every completion
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the next completion fail with `message`
    pub fn fail_next(&self, message: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(message.to_string());
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Highest number of completions that ran at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self.failures.lock().ok().and_then(|mut f| f.pop_front());
        if let Some(message) = failure {
            return Err(Error::Llm(message));
        }

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        Ok(Completion {
            text: format!("echo: {last_user}"),
            usage: self.usage,
        })
    }
}
