//! End-of-run report: what happened, where the backup is, what is left to
//! fix by hand.

use std::path::PathBuf;

use serde::Serialize;

use certswap_common::error::{ErrorCode, EXIT_CANCELLED, EXIT_PARTIAL, EXIT_UNVERIFIED};

use crate::error::RotationError;
use crate::state::{
    BackupRefs, ChainStatus, CommitStatus, Discrepancy, PhaseTransition, RotationState,
    UpdateOutcome, UploadStatus, UsageReference, WorkflowPhase,
};
use crate::upload::MaterialSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Verified,
    /// Committed with verification turned off.
    Committed,
    /// Committed, but the read-back found mismatches.
    Unverified,
    DryRun,
    Partial,
    Cancelled,
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Committed => "committed",
            Self::Unverified => "unverified",
            Self::DryRun => "dry_run",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        }
    }

    pub fn exit_code(&self, error: Option<ErrorCode>) -> u8 {
        match self {
            Self::Verified | Self::Committed | Self::DryRun => 0,
            Self::Unverified => EXIT_UNVERIFIED,
            Self::Partial => EXIT_PARTIAL,
            Self::Cancelled => EXIT_CANCELLED,
            Self::Aborted => error.map(|c| c.exit_code()).unwrap_or(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceResult {
    pub reference: UsageReference,
    pub outcome: UpdateOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
    pub host: String,
    pub credential: String,
    pub outcome: RunOutcome,
    pub exit_code: u8,
    pub phase: WorkflowPhase,
    pub last_completed_phase: String,
    pub retiring_cert: Option<String>,
    pub new_cert: String,
    pub material: Option<MaterialSummary>,
    pub backup: Option<BackupRefs>,
    pub usage: Vec<UsageReference>,
    pub unmanaged: Vec<String>,
    pub upload: UploadStatus,
    pub chain: ChainStatus,
    pub updates: Vec<ReferenceResult>,
    /// References still on the retiring certificate.
    pub remediation: Vec<UsageReference>,
    pub commit: CommitStatus,
    pub discrepancies: Vec<Discrepancy>,
    pub dry_run_plan: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<ReportError>,
    pub transitions: Vec<PhaseTransition>,
    pub report_path: Option<PathBuf>,
}

impl RotationReport {
    pub fn from_state(
        state: &RotationState,
        outcome: RunOutcome,
        error: Option<&RotationError>,
    ) -> Self {
        let error = error.map(|e| ReportError {
            code: ErrorCode::from(e),
            message: e.to_string(),
        });
        let (updates, remediation) = match state.ledger() {
            Some(ledger) => (
                ledger
                    .entries()
                    .map(|(reference, outcome)| ReferenceResult {
                        reference: reference.clone(),
                        outcome: outcome.clone(),
                    })
                    .collect(),
                ledger.remediation(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Self {
            host: state.target().host.clone(),
            credential: state.target().credential.clone(),
            outcome,
            exit_code: outcome.exit_code(error.as_ref().map(|e| e.code)),
            phase: state.phase().clone(),
            last_completed_phase: state.last_completed().to_string(),
            retiring_cert: state.retiring_cert_name().map(str::to_string),
            new_cert: state.new_cert_name().to_string(),
            material: None,
            backup: state.backup_refs().cloned(),
            usage: state
                .usage_set()
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            unmanaged: state.unmanaged().to_vec(),
            upload: state.upload_status().clone(),
            chain: state.chain().clone(),
            updates,
            remediation,
            commit: state.commit_status().clone(),
            discrepancies: state.discrepancies().to_vec(),
            dry_run_plan: Vec::new(),
            warnings: Vec::new(),
            error,
            transitions: state.transitions().to_vec(),
            report_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TargetIdentity;

    #[test]
    fn exit_codes_per_outcome() {
        assert_eq!(RunOutcome::Verified.exit_code(None), 0);
        assert_eq!(RunOutcome::Committed.exit_code(None), 0);
        assert_eq!(RunOutcome::DryRun.exit_code(None), 0);
        assert_eq!(RunOutcome::Partial.exit_code(None), 2);
        assert_eq!(RunOutcome::Unverified.exit_code(None), 3);
        assert_eq!(RunOutcome::Cancelled.exit_code(None), 130);
        assert_eq!(
            RunOutcome::Aborted.exit_code(Some(ErrorCode::CommitFailed)),
            1
        );
    }

    #[test]
    fn outcome_names_match_serialized_form() {
        for outcome in [
            RunOutcome::Verified,
            RunOutcome::Committed,
            RunOutcome::Unverified,
            RunOutcome::DryRun,
            RunOutcome::Partial,
            RunOutcome::Cancelled,
            RunOutcome::Aborted,
        ] {
            assert_eq!(serde_json::to_value(outcome).unwrap(), outcome.as_str());
        }
    }

    #[test]
    fn aborted_report_serializes_error_code() {
        let mut state = RotationState::new(
            TargetIdentity {
                host: "fw01".into(),
                credential: "****".into(),
            },
            "new-wildcard",
        );
        state.abort("backup failed");
        let err = RotationError::Backup {
            artifact: "configuration export",
            reason: "timeout".into(),
        };
        let report = RotationReport::from_state(&state, RunOutcome::Aborted, Some(&err));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "aborted");
        assert_eq!(json["error"]["code"], "backup_failed");
        assert_eq!(json["phase"]["phase"], "aborted");
        assert_eq!(json["last_completed_phase"], "INIT");
        assert_eq!(json["exit_code"], 1);
    }
}
