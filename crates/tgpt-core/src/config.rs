//! Configuration management
//!
//! Settings are read in this order, later sources winning:
//! 1. defaults
//! 2. `tgpt.toml` (or the file passed on the command line)
//! 3. environment variables
//!
//! `${VAR_NAME}` inside the TOML file is replaced with the variable's value
//! before parsing.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cost::{Price, PriceTable};
use crate::llm::RequestParams;
use crate::{Error, Result};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "tgpt.toml";

/// Telegram front-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token
    pub token: String,
    /// Name shown in the greeting
    pub name: String,
    /// Users allowed to talk to the bot
    pub allowed_users: Vec<i64>,
    /// Users with admin rights; always allowed
    pub admin_users: Vec<i64>,
    /// Message catalog: `en` or `ru`
    pub language: String,
    /// Shown to users who need help or lack access
    pub admin_contact: String,
    /// Prefix for amounts in `/stats`
    pub currency: String,
    /// Multiplier applied to costs in `/stats`
    pub rate: f64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            name: "TGPT".to_string(),
            allowed_users: Vec::new(),
            admin_users: Vec::new(),
            language: "en".to_string(),
            admin_contact: "https://github.com/muzykantov/tgpt".to_string(),
            currency: "$".to_string(),
            rate: 1.0,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key
    pub api_key: String,
    /// Model every session talks to
    pub model: String,
    /// OpenAI-compatible endpoint
    pub base_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session leaves the cache
    pub ttl_secs: u64,
    /// Time between sweeps; half the TTL when unset
    pub sweep_interval_secs: Option<u64>,
    /// Generation parameters for new sessions
    #[serde(flatten)]
    pub params: RequestParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: None,
            params: RequestParams::default(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        match self.sweep_interval_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.ttl() / 2,
        }
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per record
    #[default]
    Fs,
    /// SQLite database
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "file" | "json" => Ok(Self::Fs),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Config(format!("unknown storage backend '{}'", other))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the JSON files
    pub dir: String,
    /// Database file for the SQLite backend
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            dir: ".db".to_string(),
            sqlite_path: ".db/tgpt.sqlite".to_string(),
        }
    }
}

/// Main configuration for tgpt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    /// Price overrides and additions, keyed by model name
    pub pricing: HashMap<String, Price>,
}

impl Config {
    /// Load from `path`, or from `tgpt.toml` when present, then apply the
    /// environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a TOML file, expanding `${VAR}` references from the environment
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content, |key| std::env::var(key).ok())
    }

    /// Parse TOML text, resolving `${VAR}` through `lookup`
    pub fn from_toml_str(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let expanded = expand_vars(content, lookup);
        toml::from_str(&expanded).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Override settings from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override settings from `lookup`. Unparsable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        // Telegram
        if let Some(token) = get("TGPT_TELEGRAM_BOT_TOKEN") {
            self.telegram.token = token;
        }
        if let Some(name) = get("TGPT_NAME") {
            self.telegram.name = name;
        }
        if let Some(users) = get("TGPT_ALLOWED_USERS") {
            self.telegram.allowed_users = parse_list("TGPT_ALLOWED_USERS", &users);
        }
        if let Some(users) = get("TGPT_ADMIN_USERS") {
            self.telegram.admin_users = parse_list("TGPT_ADMIN_USERS", &users);
        }
        if let Some(language) = get("TGPT_LANGUAGE") {
            self.telegram.language = language;
        }
        if let Some(contact) = get("TGPT_ADMIN_CONTACT") {
            self.telegram.admin_contact = contact;
        }
        if let Some(currency) = get("TGPT_CURRENCY") {
            self.telegram.currency = currency;
        }
        override_parsed(&get, "TGPT_RATE", &mut self.telegram.rate);

        // LLM
        if let Some(key) = get("TGPT_OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = get("MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = get("TGPT_OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        override_parsed(&get, "TGPT_LLM_TIMEOUT_SEC", &mut self.llm.timeout_secs);

        // Session
        override_parsed(&get, "TGPT_CACHE_TTL_SEC", &mut self.session.ttl_secs);
        if let Some(secs) = get("TGPT_SWEEP_INTERVAL_SEC") {
            match secs.parse() {
                Ok(secs) => self.session.sweep_interval_secs = Some(secs),
                Err(e) => warn!("Error parsing TGPT_SWEEP_INTERVAL_SEC '{}': {}", secs, e),
            }
        }
        let params = &mut self.session.params;
        override_parsed(&get, "TGPT_MAX_TOKENS", &mut params.max_tokens);
        override_parsed(&get, "TGPT_TEMPERATURE", &mut params.temperature);
        override_parsed(&get, "TGPT_TOP_P", &mut params.top_p);
        override_parsed(&get, "TGPT_PRESENCE_PENALTY", &mut params.presence_penalty);
        override_parsed(&get, "TGPT_FREQUENCY_PENALTY", &mut params.frequency_penalty);

        // Storage
        override_parsed(&get, "TGPT_STORAGE", &mut self.storage.backend);
        if let Some(dir) = get("TGPT_DB_DIR") {
            self.storage.dir = dir;
        }
        if let Some(path) = get("TGPT_SQLITE_PATH") {
            self.storage.sqlite_path = path;
        }
    }

    /// Check that everything needed to start the bot is present
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.is_empty() {
            return Err(Error::Config("TGPT_OPENAI_API_KEY not set".to_string()));
        }
        if self.telegram.token.is_empty() {
            return Err(Error::Config("TGPT_TELEGRAM_BOT_TOKEN not set".to_string()));
        }
        if self.session.ttl_secs == 0 {
            return Err(Error::Config("session ttl must be positive".to_string()));
        }
        Ok(())
    }

    /// Built-in prices with the configured overrides applied
    pub fn price_table(&self) -> PriceTable {
        let mut table = PriceTable::default();
        for (model, price) in &self.pricing {
            table.insert(model.clone(), *price);
        }
        table
    }
}

fn override_parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(e) => warn!("Error parsing {} '{}': {}", key, raw, e),
        }
    }
}

fn parse_list(key: &str, raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Error parsing {} entry '{}': {}", key, s, e);
                None
            }
        })
        .collect()
}

/// Replace `${VAR}` with `lookup(VAR)`, or nothing when it is unset
fn expand_vars(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }

            if let Some(value) = lookup(&var_name) {
                result.push_str(&value);
            }
        } else {
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.session.ttl(), Duration::from_secs(3600));
        assert_eq!(config.session.sweep_interval(), Duration::from_secs(1800));
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.dir, ".db");
        assert_eq!(config.telegram.rate, 1.0);
        assert_eq!(config.session.params, RequestParams::default());
    }

    #[test]
    fn test_from_toml_str() {
        let toml = r#"
            [telegram]
            token = "${BOT_TOKEN}"
            allowed_users = [1, 2]
            currency = "EUR "

            [llm]
            api_key = "sk-test"
            model = "gpt-4-1106-preview"

            [session]
            ttl_secs = 600
            sweep_interval_secs = 60
            max_tokens = 1024
            temperature = 0.5

            [storage]
            backend = "sqlite"

            [pricing."local-model"]
            input_per_1k = 0.0
            output_per_1k = 0.001
        "#;

        let config = Config::from_toml_str(toml, env(&[("BOT_TOKEN", "123:abc")])).unwrap();
        assert_eq!(config.telegram.token, "123:abc");
        assert_eq!(config.telegram.allowed_users, vec![1, 2]);
        assert_eq!(config.telegram.name, "TGPT");
        assert_eq!(config.llm.model, "gpt-4-1106-preview");
        assert_eq!(config.session.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.session.params.max_tokens, 1024);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(config.price_table().get("local-model").is_some());
        assert!(config.price_table().get("gpt-4").is_some());
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[llm\nmodel = ", env(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("TGPT_TELEGRAM_BOT_TOKEN", "tok"),
            ("TGPT_OPENAI_API_KEY", "key"),
            ("MODEL", "gpt-3.5-turbo"),
            ("TGPT_ALLOWED_USERS", "10, 20,bad,30"),
            ("TGPT_ADMIN_USERS", "99"),
            ("TGPT_RATE", "90.5"),
            ("TGPT_CACHE_TTL_SEC", "120"),
            ("TGPT_TEMPERATURE", "0.2"),
            ("TGPT_STORAGE", "sqlite"),
        ]));

        assert_eq!(config.telegram.token, "tok");
        assert_eq!(config.llm.api_key, "key");
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.telegram.allowed_users, vec![10, 20, 30]);
        assert_eq!(config.telegram.admin_users, vec![99]);
        assert_eq!(config.telegram.rate, 90.5);
        assert_eq!(config.session.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.session.params.temperature, 0.2);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_numbers_keep_defaults() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("TGPT_CACHE_TTL_SEC", "soon"),
            ("TGPT_MAX_TOKENS", "-5"),
            ("TGPT_STORAGE", "redis"),
        ]));
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.session.params.max_tokens, 0);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
    }

    #[test]
    fn test_validate_requires_secrets() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
        config.llm.api_key = "key".to_string();
        assert!(config.validate().is_err());
        config.telegram.token = "tok".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_vars() {
        let lookup = env(&[("CC", "value")]);
        assert_eq!(expand_vars("a_${CC}_b", &lookup), "a_value_b");
        assert_eq!(expand_vars("a_${MISSING}_b", &lookup), "a__b");
        assert_eq!(expand_vars("${}_content", &lookup), "_content");
        assert_eq!(expand_vars("no vars $ here", &lookup), "no vars $ here");
    }
}
