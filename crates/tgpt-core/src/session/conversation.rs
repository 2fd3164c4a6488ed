//! A single live conversation

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::cost::PriceTable;
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest, RequestParams};
use crate::session::{History, Message, SessionId, Statistics};
use crate::storage::Storage;
use crate::{Error, Result};

/// Collaborators shared by every session of a provider
#[derive(Clone)]
pub struct SessionDeps {
    pub client: Arc<dyn CompletionClient>,
    pub storage: Arc<dyn Storage>,
    pub prices: Arc<PriceTable>,
    pub clock: Arc<dyn Clock>,
}

/// Whether the session's durable state has been read yet
enum CacheState {
    Unloaded,
    Loaded(Loaded),
    /// The last load attempt failed; the next operation tries again.
    Failed,
}

struct Loaded {
    history: History,
    statistics: Statistics,
}

struct State {
    params: RequestParams,
    cache: CacheState,
}

/// One conversation's history and statistics, loaded lazily from storage.
///
/// All operations lock the session for their whole duration, including the
/// model round trip in [`ask`](Self::ask), so exchanges on one session are
/// applied and persisted strictly one after another.
pub struct Session {
    id: SessionId,
    deps: SessionDeps,
    state: RwLock<State>,
}

impl Session {
    pub fn new(id: SessionId, deps: SessionDeps, params: RequestParams) -> Self {
        Self {
            id,
            deps,
            state: RwLock::new(State {
                params,
                cache: CacheState::Unloaded,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Replace the generation parameters used by subsequent exchanges
    pub async fn set_request_params(&self, params: RequestParams) {
        self.state.write().await.params = params;
    }

    pub async fn request_params(&self) -> RequestParams {
        self.state.read().await.params
    }

    /// Set the system prompt. Unchanged prompts are not written back.
    pub async fn set_prompt(&self, prompt: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let loaded = self.loaded(&mut state.cache).await?;

        if !loaded.history.set_prompt(prompt) {
            return Ok(());
        }

        self.deps
            .storage
            .save_history(&loaded.history)
            .await
            .map_err(|e| Error::storage("save history", e))?;

        debug!(session = %self.id, "Prompt updated");
        Ok(())
    }

    /// Send `message` to the model and record the exchange.
    ///
    /// With `reset` the prior log is left out of the request and cleared
    /// afterwards instead of being extended. Nothing is mutated when the
    /// model call or the price lookup fails.
    pub async fn ask(&self, message: &str, reset: bool) -> Result<String> {
        let mut state = self.state.write().await;
        let params = state.params;
        let loaded = self.loaded(&mut state.cache).await?;

        let request = CompletionRequest {
            model: self.id.model.clone(),
            messages: build_messages(&loaded.history, message, reset),
            params,
        };

        let completion = self.deps.client.complete(&request).await?;

        let cost = self
            .deps
            .prices
            .calculate_cost_by_model(&completion.usage, &self.id.model)?;

        if reset {
            loaded.history.clear();
        } else {
            loaded
                .history
                .add(Message::new(message, completion.text.as_str()));
        }

        loaded.statistics.add_cost(cost, self.deps.clock.now());

        self.deps
            .storage
            .save_history(&loaded.history)
            .await
            .map_err(|e| Error::storage("save history", e))?;

        self.deps
            .storage
            .save_statistics(&loaded.statistics)
            .await
            .map_err(|e| Error::storage("save statistics", e))?;

        debug!(
            session = %self.id,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            cost,
            "Exchange recorded"
        );

        Ok(completion.text)
    }

    /// Clear the conversation log, keeping the prompt and statistics
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let loaded = self.loaded(&mut state.cache).await?;

        loaded.history.clear();

        self.deps
            .storage
            .save_history(&loaded.history)
            .await
            .map_err(|e| Error::storage("save history", e))?;

        info!(session = %self.id, "Conversation reset");
        Ok(())
    }

    /// Snapshot of the history
    pub async fn history(&self) -> Result<History> {
        {
            let state = self.state.read().await;
            if let CacheState::Loaded(loaded) = &state.cache {
                return Ok(loaded.history.clone());
            }
        }

        let mut state = self.state.write().await;
        Ok(self.loaded(&mut state.cache).await?.history.clone())
    }

    /// Snapshot of the statistics
    pub async fn statistics(&self) -> Result<Statistics> {
        {
            let state = self.state.read().await;
            if let CacheState::Loaded(loaded) = &state.cache {
                return Ok(loaded.statistics.clone());
            }
        }

        let mut state = self.state.write().await;
        Ok(self.loaded(&mut state.cache).await?.statistics.clone())
    }

    /// Load history and statistics on first use
    async fn loaded<'a>(&self, cache: &'a mut CacheState) -> Result<&'a mut Loaded> {
        if !matches!(cache, CacheState::Loaded(_)) {
            if matches!(cache, CacheState::Failed) {
                debug!(session = %self.id, "Retrying session load");
            }

            match self.load().await {
                Ok(loaded) => *cache = CacheState::Loaded(loaded),
                Err(e) => {
                    *cache = CacheState::Failed;
                    return Err(e);
                }
            }
        }

        match cache {
            CacheState::Loaded(loaded) => Ok(loaded),
            _ => Err(Error::Other(format!("session {} is not loaded", self.id))),
        }
    }

    async fn load(&self) -> Result<Loaded> {
        let history = self
            .deps
            .storage
            .load_history(&self.id)
            .await
            .map_err(|e| Error::storage("load history", e))?;

        let statistics = self
            .deps
            .storage
            .load_statistics(&self.id)
            .await
            .map_err(|e| Error::storage("load statistics", e))?;

        debug!(session = %self.id, messages = history.len(), "Session loaded from storage");
        Ok(Loaded {
            history,
            statistics,
        })
    }
}

/// Prompt, then prior exchanges unless resetting, then the new message
fn build_messages(history: &History, message: &str, reset: bool) -> Vec<ChatMessage> {
    let prior = if reset { 0 } else { history.log.len() * 2 };
    let mut messages = Vec::with_capacity(prior + 2);

    if !history.prompt.is_empty() {
        messages.push(ChatMessage::system(history.prompt.as_str()));
    }

    if !reset {
        for exchange in &history.log {
            messages.push(ChatMessage::user(exchange.user.as_str()));
            messages.push(ChatMessage::assistant(exchange.assistant.as_str()));
        }
    }

    messages.push(ChatMessage::user(message));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Role, Usage};
    use crate::testing::{RecordingStorage, ScriptedClient, test_deps};
    use std::time::Duration;

    fn id() -> SessionId {
        SessionId::new(10, 20, "gpt-4")
    }

    fn session_with(client: Arc<ScriptedClient>, storage: Arc<RecordingStorage>) -> Session {
        Session::new(id(), test_deps(client, storage), RequestParams::default())
    }

    #[test]
    fn test_build_messages_order() {
        let mut history = History::new(id());
        history.prompt = "system text".to_string();
        history.add(Message::new("u1", "a1"));
        history.add(Message::new("u2", "a2"));

        let messages = build_messages(&history, "new", false);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User
            ]
        );
        assert_eq!(messages[1].content, "u1");
        assert_eq!(messages[4].content, "a2");
        assert_eq!(messages[5].content, "new");
    }

    #[test]
    fn test_build_messages_reset_and_no_prompt() {
        let mut history = History::new(id());
        history.add(Message::new("u1", "a1"));

        let messages = build_messages(&history, "fresh", true);
        assert_eq!(messages, vec![ChatMessage::user("fresh")]);
    }

    #[tokio::test]
    async fn test_ask_appends_in_order() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client.clone(), storage.clone());

        assert_eq!(session.ask("first", false).await.unwrap(), "echo: first");
        session.ask("second", false).await.unwrap();

        let history = session.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.log[0], Message::new("first", "echo: first"));
        assert_eq!(history.log[1].user, "second");

        // The second request carries the first exchange.
        let requests = client.requests();
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].model, "gpt-4");

        // Persisted state matches memory.
        assert_eq!(storage.stored_history(&id()).await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_ask_with_reset_clears_log() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client.clone(), storage.clone());

        session.ask("one", false).await.unwrap();
        session.ask("two", false).await.unwrap();
        session.ask("three", true).await.unwrap();

        assert!(session.history().await.unwrap().is_empty());
        assert_eq!(client.requests()[2].messages.len(), 1);

        // The reset exchange is still billed.
        let stats = session.statistics().await.unwrap();
        assert!((stats.total - 0.27).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ask_records_cost() {
        let client = Arc::new(ScriptedClient::new().with_usage(Usage::new(1000, 1000)));
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client, storage.clone());

        session.ask("hi", false).await.unwrap();

        let stats = session.statistics().await.unwrap();
        assert!((stats.last_message - 0.09).abs() < 1e-9);
        assert!((stats.daily - 0.09).abs() < 1e-9);
        assert_eq!(storage.stored_statistics(&id()).await.unwrap(), stats);
    }

    #[tokio::test]
    async fn test_ask_model_failure_mutates_nothing() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client.clone(), storage.clone());

        session.ask("ok", false).await.unwrap();
        client.fail_next("provider down");

        let err = session.ask("boom", false).await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));

        assert_eq!(session.history().await.unwrap().len(), 1);
        assert_eq!(storage.history_saves(), 1);
        assert_eq!(storage.statistics_saves(), 1);
    }

    #[tokio::test]
    async fn test_ask_unknown_price_mutates_nothing() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = Session::new(
            SessionId::new(1, 1, "unpriced-model"),
            test_deps(client.clone(), storage.clone()),
            RequestParams::default(),
        );

        let err = session.ask("hi", false).await.unwrap_err();
        assert!(matches!(err, Error::PriceNotFound { .. }));
        // The model was asked anyway.
        assert_eq!(client.requests().len(), 1);
        assert!(session.history().await.unwrap().is_empty());
        assert_eq!(storage.history_saves(), 0);
        assert_eq!(storage.statistics_saves(), 0);
        assert_eq!(
            session.statistics().await.unwrap(),
            Statistics::new(SessionId::new(1, 1, "unpriced-model"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ask_releases_lock_and_mutates_nothing() {
        let client = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(200)));
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client.clone(), storage.clone());

        session.ask("kept", false).await.unwrap();
        assert_eq!(storage.history_saves(), 1);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), session.ask("dropped", false)).await;
        assert!(cancelled.is_err());
        assert_eq!(client.requests().len(), 2);

        let history = tokio::time::timeout(Duration::from_millis(1), session.history())
            .await
            .expect("session lock still held after cancellation")
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.log[0].user, "kept");
        assert_eq!(storage.history_saves(), 1);
        assert_eq!(storage.statistics_saves(), 1);

        // The session keeps working afterwards.
        session.ask("next", false).await.unwrap();
        assert_eq!(session.history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_statistics_save_failure_leaves_history_ahead() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client, storage.clone());

        storage.fail_statistics_saves(true);
        let err = session.ask("hi", false).await.unwrap_err();
        assert!(matches!(err, Error::Storage { operation: "save statistics", .. }));

        assert_eq!(storage.stored_history(&id()).await.unwrap().len(), 1);
        assert!(storage.stored_statistics(&id()).await.is_none());
    }

    #[tokio::test]
    async fn test_set_prompt_twice_writes_once() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client, storage.clone());

        session.set_prompt("be terse").await.unwrap();
        session.set_prompt("be terse").await.unwrap();

        assert_eq!(storage.history_loads(), 1);
        assert_eq!(storage.statistics_loads(), 1);
        assert_eq!(storage.history_saves(), 1);
        assert_eq!(session.history().await.unwrap().prompt, "be terse");
    }

    #[tokio::test]
    async fn test_prompt_is_sent_as_system_message() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client.clone(), storage);

        session.set_prompt("talk like a pirate").await.unwrap();
        session.ask("hello", false).await.unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.messages[0], ChatMessage::system("talk like a pirate"));
    }

    #[tokio::test]
    async fn test_reset_keeps_prompt_and_statistics() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(client, storage.clone());

        session.set_prompt("p").await.unwrap();
        session.ask("q", false).await.unwrap();
        let before = session.statistics().await.unwrap();

        session.reset().await.unwrap();

        let history = session.history().await.unwrap();
        assert!(history.is_empty());
        assert_eq!(history.prompt, "p");
        assert_eq!(session.statistics().await.unwrap(), before);
        assert!(storage.stored_history(&id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loads_once_from_existing_state() {
        let client = Arc::new(ScriptedClient::new());
        let storage = Arc::new(RecordingStorage::new());
        let mut seeded = History::new(id());
        seeded.add(Message::new("old", "answer"));
        storage.save_history(&seeded).await.unwrap();

        let session = session_with(client.clone(), storage.clone());
        assert_eq!(session.history().await.unwrap().len(), 1);
        session.ask("new", false).await.unwrap();
        session.statistics().await.unwrap();

        assert_eq!(storage.history_loads(), 1);
        assert_eq!(storage.statistics_loads(), 1);
        assert_eq!(client.requests()[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_loaded_empty_history_is_not_reloaded() {
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(Arc::new(ScriptedClient::new()), storage.clone());

        session.history().await.unwrap();
        session.history().await.unwrap();
        session.statistics().await.unwrap();

        assert_eq!(storage.history_loads(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_is_retried() {
        let storage = Arc::new(RecordingStorage::new());
        let session = session_with(Arc::new(ScriptedClient::new()), storage.clone());

        storage.fail_loads(true);
        let err = session.history().await.unwrap_err();
        assert!(matches!(err, Error::Storage { operation: "load history", .. }));

        storage.fail_loads(false);
        assert!(session.history().await.unwrap().is_empty());
        assert_eq!(storage.history_loads(), 2);
    }

    #[tokio::test]
    async fn test_set_request_params_reach_model() {
        let client = Arc::new(ScriptedClient::new());
        let session = session_with(client.clone(), Arc::new(RecordingStorage::new()));
        let params = RequestParams {
            max_tokens: 256,
            temperature: 0.3,
            ..Default::default()
        };

        session.set_request_params(params).await;
        session.ask("hi", false).await.unwrap();

        assert_eq!(session.request_params().await, params);
        assert_eq!(client.requests()[0].params, params);
    }

    #[tokio::test]
    async fn test_concurrent_asks_are_serialized() {
        let client = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(20)));
        let storage = Arc::new(RecordingStorage::new());
        let session = Arc::new(session_with(client.clone(), storage));

        let mut handles = Vec::new();
        for i in 0..5 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                session.ask(&format!("msg {i}"), false).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(client.max_in_flight(), 1);
        let history = session.history().await.unwrap();
        assert_eq!(history.len(), 5);
        // Each request saw every exchange recorded before it.
        let mut sizes: Vec<usize> = client.requests().iter().map(|r| r.messages.len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 3, 5, 7, 9]);
    }
}
