use thiserror::Error;

/// Error taxonomy for the conversation core.
///
/// Nothing here is retried automatically. Validation and not-found errors go
/// straight back to the caller; store errors surface as tagged failures so the
/// UI can render a generic message; generation failures are either returned or
/// masked with a fixed fallback at the orchestrator/dashboard boundary.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("generation request failed: {0}")]
    Generation(String),

    /// The hosted model answered, but not in the shape the template declared.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Generation(err.to_string())
    }
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    /// True for errors the caller caused (bad input, missing record) rather
    /// than infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::Validation(_) | ChatError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(ChatError::validation("empty").is_client_error());
        assert!(ChatError::NotFound("conv".into()).is_client_error());
        assert!(!ChatError::Generation("boom".into()).is_client_error());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: ChatError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, ChatError::Store(_)));
    }
}
