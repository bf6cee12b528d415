use serde::{Deserialize, Serialize};

/// Machine-readable error codes for reports and process exit status.
/// Shared by the store client, the rotation core and the CLI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidConfig,
    Connectivity,
    Unauthorized,
    Timeout,
    Rejected,
    ParseError,
    BackupFailed,
    SelectionFailed,
    Cancelled,
    InvalidMaterial,
    UploadFailed,
    PartialUpdate,
    CommitFailed,
    CommitTimeout,
    VerificationMismatch,
    StateViolation,
}

/// Exit status for a run that left some consumers on the old certificate.
pub const EXIT_PARTIAL: u8 = 2;

/// Exit status for a committed run whose read-back did not match.
pub const EXIT_UNVERIFIED: u8 = 3;

/// Exit status when the operator cancelled (matches SIGINT convention).
pub const EXIT_CANCELLED: u8 = 130;

impl ErrorCode {
    /// Process exit code for a run that ended with this error.
    ///
    /// Partial consumer updates get their own code so automation can tell
    /// "nothing committed, remediation list printed" apart from a hard abort.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::PartialUpdate => EXIT_PARTIAL,
            Self::VerificationMismatch => EXIT_UNVERIFIED,
            Self::Cancelled => EXIT_CANCELLED,
            Self::InvalidConfig
            | Self::Connectivity
            | Self::Unauthorized
            | Self::Timeout
            | Self::Rejected
            | Self::ParseError
            | Self::BackupFailed
            | Self::SelectionFailed
            | Self::InvalidMaterial
            | Self::UploadFailed
            | Self::CommitFailed
            | Self::CommitTimeout
            | Self::StateViolation => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorCode::PartialUpdate).unwrap(),
            "partial_update"
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::CommitTimeout).unwrap(),
            "commit_timeout"
        );
    }

    #[test]
    fn exit_codes_distinguish_partial_and_cancelled() {
        let cases = [
            (ErrorCode::PartialUpdate, 2),
            (ErrorCode::Cancelled, 130),
            (ErrorCode::VerificationMismatch, 3),
            (ErrorCode::Connectivity, 1),
            (ErrorCode::BackupFailed, 1),
            (ErrorCode::UploadFailed, 1),
            (ErrorCode::CommitFailed, 1),
            (ErrorCode::CommitTimeout, 1),
            (ErrorCode::StateViolation, 1),
        ];
        for (code, expected) in cases {
            assert_eq!(code.exit_code(), expected, "{code:?}");
        }
    }
}
