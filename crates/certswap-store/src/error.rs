//! Store error types.

use certswap_common::error::ErrorCode;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("appliance not reachable: {0}")]
    Connectivity(String),

    #[error("appliance rejected the API key")]
    Unauthorized,

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("appliance rejected the request: {message}")]
    Rejected { message: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Transport and authentication failures: nothing about the request
    /// itself was evaluated by the appliance.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Unauthorized)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

impl From<&StoreError> for ErrorCode {
    fn from(e: &StoreError) -> Self {
        match e {
            StoreError::Connectivity(_) => ErrorCode::Connectivity,
            StoreError::Unauthorized => ErrorCode::Unauthorized,
            StoreError::Timeout { .. } => ErrorCode::Timeout,
            StoreError::Rejected { .. } => ErrorCode::Rejected,
            StoreError::Decode(_) => ErrorCode::ParseError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_classification() {
        assert!(StoreError::Connectivity("refused".into()).is_connectivity());
        assert!(StoreError::Unauthorized.is_connectivity());
        assert!(!StoreError::Timeout { secs: 30 }.is_connectivity());
        assert!(!StoreError::rejected("bad xpath").is_connectivity());
    }

    #[test]
    fn maps_to_error_codes() {
        assert_eq!(
            ErrorCode::from(&StoreError::Unauthorized),
            ErrorCode::Unauthorized
        );
        assert_eq!(
            ErrorCode::from(&StoreError::Decode("x".into())),
            ErrorCode::ParseError
        );
    }
}
