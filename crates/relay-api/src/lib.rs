//! Relay API crate - axum HTTP server, JSON handlers, and the chat page.
//!
//! Exposes user registration, conversation management, and the turn
//! exchange over JSON, plus a server-rendered chat page whose history lives
//! in process memory.

pub mod error;
pub mod handlers;
pub mod page;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
