//! Relay Storage crate - SQLite persistence for users, conversations, and messages.
//!
//! Provides a WAL-mode SQLite database with migrations, Argon2id credential
//! hashing, and repository implementations for the relay's stored state.

pub mod credentials;
pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{ConversationRepository, MessageRepository, NewMessage, UserRepository};
