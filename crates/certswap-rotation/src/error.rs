//! Rotation domain error types.

use certswap_common::error::ErrorCode;
use certswap_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("appliance unreachable: {0}")]
    Connectivity(StoreError),

    #[error("backup failed ({artifact}): {reason}")]
    Backup { artifact: &'static str, reason: String },

    #[error("certificate selection failed: {0}")]
    Selection(String),

    #[error("cancelled by operator")]
    Cancelled,

    #[error("invalid certificate material: {0}")]
    InvalidMaterial(String),

    #[error(transparent)]
    Upload(UploadError),

    #[error("{failed} of {total} references were not updated; nothing was committed")]
    PartialUpdate { failed: usize, total: usize },

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("commit status unknown after {secs}s (job {job}), check the appliance job list")]
    CommitTimeout { secs: u64, job: String },

    #[error("{count} references did not read back as expected after the commit")]
    VerificationMismatch { count: usize },

    #[error("illegal state transition: {0}")]
    State(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

/// Transport and authentication failures abort immediately as
/// `Connectivity`; everything else keeps the store's classification.
impl From<StoreError> for RotationError {
    fn from(e: StoreError) -> Self {
        if e.is_connectivity() {
            Self::Connectivity(e)
        } else {
            Self::Store(e)
        }
    }
}

impl From<&RotationError> for ErrorCode {
    fn from(e: &RotationError) -> Self {
        match e {
            RotationError::Config(_) => ErrorCode::InvalidConfig,
            RotationError::Connectivity(inner) => ErrorCode::from(inner),
            RotationError::Backup { .. } => ErrorCode::BackupFailed,
            RotationError::Selection(_) => ErrorCode::SelectionFailed,
            RotationError::Cancelled => ErrorCode::Cancelled,
            RotationError::InvalidMaterial(_) => ErrorCode::InvalidMaterial,
            RotationError::Upload(_) => ErrorCode::UploadFailed,
            RotationError::PartialUpdate { .. } => ErrorCode::PartialUpdate,
            RotationError::Commit(_) => ErrorCode::CommitFailed,
            RotationError::CommitTimeout { .. } => ErrorCode::CommitTimeout,
            RotationError::VerificationMismatch { .. } => ErrorCode::VerificationMismatch,
            RotationError::State(_) => ErrorCode::StateViolation,
            RotationError::Store(inner) => ErrorCode::from(inner),
        }
    }
}

/// Outcome classes of the upload phase.
///
/// Keypair import failures end the run. Chain import failures are carried
/// in the upload receipt and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("certificate/key import failed: {0}")]
    Fatal(String),

    #[error("chain import failed: {0}")]
    Recoverable(String),
}

/// Failure of one consumer update. Recorded in the ledger, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceUpdateError {
    #[error("object no longer exists")]
    Missing,

    #[error("object references neither `{retiring}` nor `{new}`")]
    NotReferenced { retiring: String, new: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_connectivity_escalates() {
        let e = RotationError::from(StoreError::Unauthorized);
        assert!(matches!(e, RotationError::Connectivity(_)));
        assert_eq!(ErrorCode::from(&e), ErrorCode::Unauthorized);

        let e = RotationError::from(StoreError::rejected("bad xpath"));
        assert!(matches!(e, RotationError::Store(_)));
        assert_eq!(ErrorCode::from(&e), ErrorCode::Rejected);
    }

    #[test]
    fn partial_update_maps_to_its_exit_code() {
        let e = RotationError::PartialUpdate {
            failed: 1,
            total: 2,
        };
        assert_eq!(ErrorCode::from(&e).exit_code(), 2);
        assert_eq!(
            e.to_string(),
            "1 of 2 references were not updated; nothing was committed"
        );
    }

    #[test]
    fn upload_errors_keep_their_class() {
        let fatal = RotationError::Upload(UploadError::Fatal("bad key".into()));
        assert_eq!(ErrorCode::from(&fatal), ErrorCode::UploadFailed);
        assert_eq!(
            fatal.to_string(),
            "certificate/key import failed: bad key"
        );
    }
}
