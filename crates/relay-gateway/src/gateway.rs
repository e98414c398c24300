use async_trait::async_trait;

use relay_core::types::Turn;

use crate::error::GatewayError;

/// The model's answer to one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Text of the first text content block.
    pub text: String,
    /// Prompt tokens billed for the request, as reported by the endpoint.
    pub input_tokens: u32,
}

/// Boundary to the hosted text-generation service.
///
/// Implementations only perform the network call; they never touch the
/// conversation store.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Ask the model to continue `turns`.
    ///
    /// `system_prompt` falls back to the configured default when `None` or
    /// blank. `turns` must be non-empty.
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        turns: &[Turn],
    ) -> Result<Completion, GatewayError>;
}
