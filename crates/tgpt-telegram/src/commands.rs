//! Command handling, independent of the Telegram transport
//!
//! Each handler takes the session identity and returns the text to send back.
//! Failures are turned into the localized "unexpected error" message here so
//! the transport only ever has a string to deliver.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Datelike;
use tracing::{info, warn};

use tgpt_core::{Clock, ProvideSession, SessionId, TelegramConfig};

use crate::lang::Language;

/// Front-end settings taken from the `[telegram]` config section
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub name: String,
    pub model: String,
    pub language: Language,
    pub admin_contact: String,
    pub currency: String,
    pub rate: f64,
    allowed_users: HashSet<i64>,
    admin_users: HashSet<i64>,
}

impl BotSettings {
    pub fn new(config: &TelegramConfig, model: impl Into<String>) -> Self {
        let admin_users: HashSet<i64> = config.admin_users.iter().copied().collect();
        let allowed_users = config
            .allowed_users
            .iter()
            .chain(admin_users.iter())
            .copied()
            .collect();

        Self {
            name: config.name.clone(),
            model: model.into(),
            language: Language::from_code(&config.language),
            admin_contact: config.admin_contact.clone(),
            currency: config.currency.clone(),
            rate: config.rate,
            allowed_users,
            admin_users,
        }
    }

    /// Only listed users and admins may talk to the bot
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_users.contains(&user_id)
    }

    /// Commands advertised to Telegram clients, as `(command, description)`
    pub fn command_list(&self) -> [(&'static str, &'static str); 3] {
        [
            ("help", self.language.command_help()),
            ("stats", self.language.command_stats()),
            ("restart", self.language.command_restart()),
        ]
    }
}

/// Bot state shared across handlers
pub struct BotState {
    pub sessions: Arc<dyn ProvideSession>,
    pub settings: BotSettings,
    pub clock: Arc<dyn Clock>,
}

impl BotState {
    pub fn new(
        sessions: Arc<dyn ProvideSession>,
        settings: BotSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            settings,
            clock,
        }
    }

    /// Session identity for a user in a chat, bound to the configured model
    pub fn session_id(&self, user_id: i64, chat_id: i64) -> SessionId {
        SessionId::new(user_id, chat_id, self.settings.model.clone())
    }

    fn unexpected(&self, operation: &str, id: &SessionId, err: impl std::fmt::Display) -> String {
        warn!(session = %id, "{} failed: {}", operation, err);
        self.settings
            .language
            .unexpected_error(&self.settings.admin_contact, &err.to_string())
    }
}

/// Greeting, command list and support contact
pub fn help_text(settings: &BotSettings) -> String {
    let lang = settings.language;
    let mut text = lang.greeting(&settings.name);
    for (command, description) in settings.command_list() {
        text.push_str(&format!("/{command} — {description}\n\n"));
    }
    text.push_str(&lang.support(&settings.admin_contact));
    text
}

/// Wipe the conversation and optionally install a new system prompt
pub async fn handle_restart(state: &BotState, id: SessionId, prompt: &str) -> String {
    let session = match state.sessions.provide_session(id.clone()).await {
        Ok(session) => session,
        Err(e) => return state.unexpected("provide session", &id, e),
    };

    if let Err(e) = session.reset().await {
        return state.unexpected("reset", &id, e);
    }

    let prompt = prompt.trim();
    if !prompt.is_empty() {
        if let Err(e) = session.set_prompt(prompt).await {
            return state.unexpected("set prompt", &id, e);
        }
    }

    info!(session = %id, with_prompt = !prompt.is_empty(), "Conversation restarted");
    state.settings.language.done().to_string()
}

/// Spending for the last message, today, this month and all time
pub async fn handle_stats(state: &BotState, id: SessionId) -> String {
    let session = match state.sessions.provide_session(id.clone()).await {
        Ok(session) => session,
        Err(e) => return state.unexpected("provide session", &id, e),
    };

    let stats = match session.statistics().await {
        Ok(stats) => stats,
        Err(e) => return state.unexpected("statistics", &id, e),
    };

    let now = state.clock.now();
    // Daily spend only counts if it was recorded today.
    let today = if stats.last_update.date_naive() == now.date_naive() {
        stats.daily
    } else {
        0.0
    };

    let settings = &state.settings;
    settings.language.stats(
        &settings.currency,
        settings.rate * stats.last_message,
        settings.rate * today,
        settings.rate * stats.month(now.month()),
        settings.rate * stats.total,
    )
}

/// Send `text` to the model and return its reply
pub async fn handle_ask(state: &BotState, id: SessionId, text: &str) -> String {
    let session = match state.sessions.provide_session(id.clone()).await {
        Ok(session) => session,
        Err(e) => return state.unexpected("provide session", &id, e),
    };

    match session.ask(text, false).await {
        Ok(reply) => reply,
        Err(e) => state.unexpected("ask", &id, e),
    }
}
