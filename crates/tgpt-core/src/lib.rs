//! tgpt-core: session cache and conversation state for the tgpt chat bridge
//!
//! Owns per-conversation history, cost accounting, persistence backends,
//! the OpenAI-compatible completion client, and the TTL session cache that
//! front ends fetch sessions from.

pub mod clock;
pub mod config;
pub mod cost;
pub mod error;
pub mod llm;
pub mod session;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, LlmConfig, SessionConfig, StorageBackend, StorageConfig, TelegramConfig};
pub use cost::{Price, PriceTable, calculate_cost};
pub use error::{Error, Result};
pub use llm::{CompletionClient, OpenAiClient, RequestParams, Usage};
pub use session::{
    Cost, History, Message, ProvideSession, Session, SessionDeps, SessionId, SessionProvider,
    Statistics, SweeperHandle,
};
pub use storage::{FsStorage, MemoryStorage, SqliteStorage, Storage};
