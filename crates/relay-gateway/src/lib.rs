//! Relay Gateway crate - boundary to the hosted text-generation model.
//!
//! Defines the [`ModelGateway`] trait the turn exchange depends on, and an
//! Anthropic Messages API implementation with a per-attempt deadline and
//! bounded exponential-backoff retries.

pub mod anthropic;
pub mod error;
pub mod gateway;

pub use anthropic::AnthropicClient;
pub use error::GatewayError;
pub use gateway::{Completion, ModelGateway};
