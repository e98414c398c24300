//! Error types for the turn exchange.

use relay_core::error::RelayError;
use relay_gateway::GatewayError;

/// Errors from a turn exchange.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("model gateway error: {0}")]
    Upstream(#[from] GatewayError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RelayError> for ChatError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(what) => ChatError::NotFound(what),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        let err = ChatError::EmptyMessage;
        assert_eq!(err.to_string(), "message cannot be empty");

        let err = ChatError::MessageTooLong(1000);
        assert_eq!(
            err.to_string(),
            "message exceeds maximum length of 1000 characters"
        );

        let err = ChatError::NotFound("conversation 'abc'".to_string());
        assert_eq!(err.to_string(), "not found: conversation 'abc'");

        let err = ChatError::Upstream(GatewayError::Timeout { attempts: 3 });
        assert_eq!(
            err.to_string(),
            "model gateway error: model endpoint timed out after 3 attempt(s)"
        );
    }

    #[test]
    fn test_from_relay_error_keeps_not_found() {
        let err: ChatError = RelayError::NotFound("conversation 'x'".to_string()).into();
        assert!(matches!(err, ChatError::NotFound(_)));

        let err: ChatError = RelayError::Storage("disk I/O".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));
    }
}
