//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use relay_chat::{PageSessions, TurnExchange};
use relay_core::config::RelayConfig;
use relay_gateway::ModelGateway;
use relay_storage::{ConversationRepository, Database, MessageRepository, UserRepository};

/// Shared application state.
///
/// All fields use `Arc` (directly or inside) for cheap cloning across
/// handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed at startup.
    pub config: Arc<RelayConfig>,
    /// SQLite database for persistent storage.
    pub database: Arc<Database>,
    /// Turn exchange bound to the model gateway.
    pub exchange: TurnExchange,
    /// In-memory transcripts for the rendered chat page.
    pub page_sessions: Arc<PageSessions>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState with the given components.
    pub fn new(config: RelayConfig, database: Database, gateway: Arc<dyn ModelGateway>) -> Self {
        let exchange = TurnExchange::new(gateway, config.chat.max_message_chars);
        let max_page_sessions = config.chat.max_page_sessions;
        Self {
            config: Arc::new(config),
            database: Arc::new(database),
            exchange,
            page_sessions: Arc::new(PageSessions::with_capacity(max_page_sessions)),
            start_time: Instant::now(),
        }
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(Arc::clone(&self.database))
    }

    pub fn conversations(&self) -> ConversationRepository {
        ConversationRepository::new(Arc::clone(&self.database))
    }

    pub fn messages(&self) -> MessageRepository {
        MessageRepository::new(Arc::clone(&self.database))
    }
}
