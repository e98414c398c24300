use thiserror::Error;

/// Top-level error type for the chat relay.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for RelayError` so that `?` works across crate
/// boundaries. A username collision on registration is not an error; it is
/// reported as a `false` return value by the store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RelayError {
    fn from(err: toml::ser::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(RelayError, &str)> = vec![
            (
                RelayError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                RelayError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                RelayError::NotFound("conversation abc".to_string()),
                "Not found: conversation abc",
            ),
            (
                RelayError::Conflict("user owns conversations".to_string()),
                "Conflict: user owns conversations",
            ),
            (
                RelayError::Validation("empty id".to_string()),
                "Validation error: empty id",
            ),
            (
                RelayError::Upstream("connection refused".to_string()),
                "Upstream error: connection refused",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let relay_err: RelayError = io_err.into();
        assert!(matches!(relay_err, RelayError::Io(_)));
        assert!(relay_err.to_string().starts_with("I/O error:"));
        assert!(relay_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let relay_err: RelayError = err.unwrap_err().into();
        assert!(matches!(relay_err, RelayError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let relay_err: RelayError = err.unwrap_err().into();
        assert!(matches!(relay_err, RelayError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
