use thiserror::Error;

/// Top-level error type for the keyhook workspace.
///
/// Configuration and resource failures surface synchronously from the owning
/// thread. The hook thread never sees this type: its transitions cannot fail.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyhookError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Out of memory while allocating {0}")]
    OutOfMemory(&'static str),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Unknown capture session #{0}")]
    UnknownSession(u64),

    #[error("Session error: {0}")]
    Session(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for KeyhookError {
    fn from(err: toml::de::Error) -> Self {
        KeyhookError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for KeyhookError {
    fn from(err: toml::ser::Error) -> Self {
        KeyhookError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for KeyhookError {
    fn from(err: serde_json::Error) -> Self {
        KeyhookError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for keyhook operations.
pub type Result<T> = std::result::Result<T, KeyhookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeyhookError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(KeyhookError, &str)> = vec![
            (
                KeyhookError::OutOfMemory("match phrases"),
                "Out of memory while allocating match phrases",
            ),
            (
                KeyhookError::InvalidOption("Q".to_string()),
                "Invalid option: Q",
            ),
            (
                KeyhookError::UnknownSession(7),
                "Unknown capture session #7",
            ),
            (
                KeyhookError::Session("not started".to_string()),
                "Session error: not started",
            ),
            (
                KeyhookError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KeyhookError = io_err.into();
        assert!(matches!(err, KeyhookError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: KeyhookError = err.unwrap_err().into();
        assert!(matches!(err, KeyhookError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: KeyhookError = err.unwrap_err().into();
        assert!(matches!(err, KeyhookError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
