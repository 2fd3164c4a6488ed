//! tgpt-telegram: Telegram front end for tgpt
//!
//! Routes Telegram messages to sessions handed out by a
//! [`ProvideSession`](tgpt_core::ProvideSession) implementation.

pub mod bot;
pub mod commands;
pub mod error;
pub mod lang;

pub use bot::TelegramBot;
pub use commands::{BotSettings, BotState};
pub use error::{Result, TelegramError};
pub use lang::Language;
