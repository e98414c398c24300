//! Error types for the model gateway.

use relay_core::error::RelayError;

/// Errors from a model completion call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),
    #[error("model endpoint timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("model endpoint unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },
    #[error("model endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// True when every attempt ran into the per-attempt deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

impl From<GatewayError> for RelayError {
    fn from(err: GatewayError) -> Self {
        RelayError::Upstream(err.to_string())
    }
}
