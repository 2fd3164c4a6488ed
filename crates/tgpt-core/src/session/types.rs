//! Session data types
//!
//! These are the durable parts of a conversation: the [`History`] of
//! exchanges and the [`Statistics`] of what they cost.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Monetary amount in the provider's billing currency
pub type Cost = f64;

/// Identifies a conversation: who is talking, where, and to which model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub user: i64,
    pub chat: i64,
    pub model: String,
}

impl SessionId {
    pub fn new(user: i64, chat: i64, model: impl Into<String>) -> Self {
        Self {
            user,
            chat,
            model: model.into(),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user, self.chat, self.model)
    }
}

/// One user message and the assistant's answer to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub user: String,
    pub assistant: String,
}

impl Message {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Conversation history of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: SessionId,
    /// System prompt sent ahead of the log; empty means none
    #[serde(default)]
    pub prompt: String,
    /// Exchanges in chronological order
    #[serde(default)]
    pub log: Vec<Message>,
}

impl History {
    /// Create an empty history
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            prompt: String::new(),
            log: Vec::new(),
        }
    }

    /// Append an exchange to the log
    pub fn add(&mut self, message: Message) {
        self.log.push(message);
    }

    /// Drop every exchange, keeping the prompt
    pub fn clear(&mut self) {
        self.log = Vec::new();
    }

    /// Replace the system prompt. Returns `false` when nothing changed.
    pub fn set_prompt(&mut self, prompt: &str) -> bool {
        if self.prompt == prompt {
            return false;
        }
        self.prompt = prompt.to_string();
        true
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

/// Running cost aggregates of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub id: SessionId,
    /// Cost of the most recent exchange
    #[serde(default)]
    pub last_message: Cost,
    /// Cost accumulated on the calendar day of `last_update`
    #[serde(default)]
    pub daily: Cost,
    /// Month of year (1-12) to cost
    #[serde(default)]
    pub monthly: BTreeMap<u32, Cost>,
    #[serde(default)]
    pub total: Cost,
    #[serde(default)]
    pub last_update: DateTime<Utc>,
}

impl Statistics {
    /// Create zeroed statistics
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            last_message: 0.0,
            daily: 0.0,
            monthly: BTreeMap::new(),
            total: 0.0,
            last_update: DateTime::<Utc>::default(),
        }
    }

    /// Record the cost of one exchange made at `now`.
    ///
    /// The daily figure restarts from zero whenever `now` falls on a
    /// different calendar day than the previous update.
    pub fn add_cost(&mut self, cost: Cost, now: DateTime<Utc>) {
        let cost = if cost.is_finite() && cost > 0.0 { cost } else { 0.0 };

        if now.date_naive() != self.last_update.date_naive() {
            self.daily = 0.0;
        }

        self.last_message = cost;
        self.daily += cost;
        self.total += cost;
        *self.monthly.entry(now.month()).or_insert(0.0) += cost;
        self.last_update = now;
    }

    /// Cost recorded for a month of year (1-12)
    pub fn month(&self, month: u32) -> Cost {
        self.monthly.get(&month).copied().unwrap_or(0.0)
    }
}
