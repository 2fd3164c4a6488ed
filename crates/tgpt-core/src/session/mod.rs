//! Session management module
//!
//! A [`SessionProvider`] caches one [`Session`] per [`SessionId`]; each
//! session owns the conversation [`History`] and cost [`Statistics`] of that
//! identity and persists them through a [`Storage`](crate::storage::Storage).

mod conversation;
mod manager;
mod types;

pub use conversation::{Session, SessionDeps};
pub use manager::{ProvideSession, SessionProvider, SweeperHandle};
pub use types::{Cost, History, Message, SessionId, Statistics};
