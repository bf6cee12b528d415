//! The rotation state record and the workflow phase machine.
//!
//! The ordering rules of a run are carried by types where possible:
//! an [`UpdateLedger`] can only be opened from an [`UploadReceipt`], and a
//! [`CommitPermit`] only comes out of a ledger whose every entry is done.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use certswap_store::JobHandle;

use crate::error::RotationError;

/// Object classes that can reference a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    SslProfile,
    Portal,
    Gateway,
}

impl UsageKind {
    pub const ALL: [UsageKind; 3] = [Self::SslProfile, Self::Portal, Self::Gateway];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SslProfile => "ssl_profile",
            Self::Portal => "portal",
            Self::Gateway => "gateway",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SslProfile => "SSL/TLS service profile",
            Self::Portal => "GlobalProtect portal",
            Self::Gateway => "GlobalProtect gateway",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UsageReference {
    pub kind: UsageKind,
    pub object_name: String,
}

impl UsageReference {
    pub fn new(kind: UsageKind, object_name: impl Into<String>) -> Self {
        Self {
            kind,
            object_name: object_name.into(),
        }
    }
}

impl fmt::Display for UsageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.object_name)
    }
}

/// The references discovered for one certificate. Ordered and duplicate
/// free; there is no way to add to a set once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UsageSet(BTreeSet<UsageReference>);

impl UsageSet {
    pub fn iter(&self) -> impl Iterator<Item = &UsageReference> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, reference: &UsageReference) -> bool {
        self.0.contains(reference)
    }

    pub fn count(&self, kind: UsageKind) -> usize {
        self.0.iter().filter(|r| r.kind == kind).count()
    }
}

impl FromIterator<UsageReference> for UsageSet {
    fn from_iter<I: IntoIterator<Item = UsageReference>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Where the restore point of a run lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRefs {
    pub config_export: PathBuf,
    pub device_state: PathBuf,
    pub config_bytes: u64,
    pub device_state_bytes: u64,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepResult {
    Partial,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkflowPhase {
    Init,
    BackedUp,
    CertSelected,
    UsageMapped,
    CertUploaded,
    ConsumersUpdated { result: SweepResult },
    CommitSubmitted,
    Committed,
    Verified,
    Aborted { reason: String },
}

impl WorkflowPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::BackedUp => "BACKED_UP",
            Self::CertSelected => "CERT_SELECTED",
            Self::UsageMapped => "USAGE_MAPPED",
            Self::CertUploaded => "CERT_UPLOADED",
            Self::ConsumersUpdated { .. } => "CONSUMERS_UPDATED",
            Self::CommitSubmitted => "COMMIT_SUBMITTED",
            Self::Committed => "COMMITTED",
            Self::Verified => "VERIFIED",
            Self::Aborted { .. } => "ABORTED",
        }
    }

    /// Whether the phase machine allows moving from `self` to `next`.
    pub fn can_advance_to(&self, next: &WorkflowPhase) -> bool {
        use WorkflowPhase::*;
        match (self, next) {
            (Verified | Aborted { .. }, _) => false,
            (_, Aborted { .. }) => true,
            (Init, BackedUp)
            | (BackedUp, CertSelected)
            | (CertSelected, UsageMapped)
            | (UsageMapped, CertUploaded)
            | (CertUploaded, ConsumersUpdated { .. })
            | (
                ConsumersUpdated {
                    result: SweepResult::Complete,
                },
                CommitSubmitted,
            )
            | (CommitSubmitted, Committed)
            | (Committed, Verified) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsumersUpdated { result } => {
                let result = match result {
                    SweepResult::Partial => "partial",
                    SweepResult::Complete => "complete",
                };
                write!(f, "CONSUMERS_UPDATED({result})")
            }
            Self::Aborted { reason } => write!(f, "ABORTED({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    NotStarted,
    Done,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    NotProvided,
    Imported { name: String },
    Failed { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Pending,
    Done,
    Failed { reason: String },
}

impl UpdateOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Done => f.write_str("done"),
            Self::Failed { reason } => write!(f, "failed({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitStatus {
    NotAttempted,
    Submitted { job: JobHandle },
    Succeeded,
    Failed { reason: String },
    /// Polling gave up; the job may still finish on the appliance.
    Unknown { job: JobHandle },
}

/// Proof that the new certificate and key were imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    cert_name: String,
    chain: ChainStatus,
}

impl UploadReceipt {
    pub(crate) fn new(cert_name: impl Into<String>, chain: ChainStatus) -> Self {
        Self {
            cert_name: cert_name.into(),
            chain,
        }
    }

    pub fn cert_name(&self) -> &str {
        &self.cert_name
    }

    pub fn chain(&self) -> &ChainStatus {
        &self.chain
    }
}

/// Per-reference outcome table of the consumer update phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLedger {
    retiring_cert_name: String,
    new_cert_name: String,
    entries: BTreeMap<UsageReference, UpdateOutcome>,
}

impl UpdateLedger {
    /// Every reference of `usage` starts out pending.
    pub fn open(receipt: &UploadReceipt, retiring_cert_name: &str, usage: &UsageSet) -> Self {
        Self {
            retiring_cert_name: retiring_cert_name.to_string(),
            new_cert_name: receipt.cert_name().to_string(),
            entries: usage
                .iter()
                .map(|r| (r.clone(), UpdateOutcome::Pending))
                .collect(),
        }
    }

    pub fn retiring_cert_name(&self) -> &str {
        &self.retiring_cert_name
    }

    pub fn new_cert_name(&self) -> &str {
        &self.new_cert_name
    }

    pub fn record(
        &mut self,
        reference: &UsageReference,
        outcome: UpdateOutcome,
    ) -> Result<(), RotationError> {
        match self.entries.get_mut(reference) {
            Some(slot) => {
                *slot = outcome;
                Ok(())
            }
            None => Err(RotationError::State(format!(
                "{reference} is not part of the usage set"
            ))),
        }
    }

    pub fn outcome(&self, reference: &UsageReference) -> Option<&UpdateOutcome> {
        self.entries.get(reference)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&UsageReference, &UpdateOutcome)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> Vec<UsageReference> {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, UpdateOutcome::Pending))
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub fn failed(&self) -> Vec<(UsageReference, String)> {
        self.entries
            .iter()
            .filter_map(|(r, o)| match o {
                UpdateOutcome::Failed { reason } => Some((r.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// References still pointing at the retiring certificate.
    pub fn remediation(&self) -> Vec<UsageReference> {
        self.entries
            .iter()
            .filter(|(_, o)| !o.is_done())
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.values().all(UpdateOutcome::is_done)
    }

    pub fn sweep_result(&self) -> SweepResult {
        if self.is_complete() {
            SweepResult::Complete
        } else {
            SweepResult::Partial
        }
    }

    /// Permission to commit, granted only when every reference is done.
    pub fn commit_permit(&self) -> Option<CommitPermit> {
        self.is_complete().then(|| CommitPermit {
            references: self.entries.len(),
        })
    }
}

/// Token required by the commit coordinator. Not constructible outside
/// [`UpdateLedger::commit_permit`].
#[derive(Debug)]
pub struct CommitPermit {
    references: usize,
}

impl CommitPermit {
    pub fn references(&self) -> usize {
        self.references
    }
}

/// Appliance address and a redacted credential handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetIdentity {
    pub host: String,
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub phase: WorkflowPhase,
    pub at: DateTime<Utc>,
}

/// A reference that did not read back as expected after the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub reference: UsageReference,
    pub detail: String,
}

/// One rotation run against one appliance. Owned by the orchestrator.
#[derive(Debug)]
pub struct RotationState {
    target: TargetIdentity,
    new_cert_name: String,
    retiring_cert_name: Option<String>,
    backup_refs: Option<BackupRefs>,
    usage_set: Option<UsageSet>,
    unmanaged: Vec<String>,
    upload_status: UploadStatus,
    chain: ChainStatus,
    ledger: Option<UpdateLedger>,
    commit_status: CommitStatus,
    discrepancies: Vec<Discrepancy>,
    phase: WorkflowPhase,
    last_completed: WorkflowPhase,
    transitions: Vec<PhaseTransition>,
}

impl RotationState {
    pub fn new(target: TargetIdentity, new_cert_name: impl Into<String>) -> Self {
        Self {
            target,
            new_cert_name: new_cert_name.into(),
            retiring_cert_name: None,
            backup_refs: None,
            usage_set: None,
            unmanaged: Vec::new(),
            upload_status: UploadStatus::NotStarted,
            chain: ChainStatus::NotProvided,
            ledger: None,
            commit_status: CommitStatus::NotAttempted,
            discrepancies: Vec::new(),
            phase: WorkflowPhase::Init,
            last_completed: WorkflowPhase::Init,
            transitions: vec![PhaseTransition {
                phase: WorkflowPhase::Init,
                at: Utc::now(),
            }],
        }
    }

    pub fn target(&self) -> &TargetIdentity {
        &self.target
    }

    pub fn new_cert_name(&self) -> &str {
        &self.new_cert_name
    }

    pub fn phase(&self) -> &WorkflowPhase {
        &self.phase
    }

    /// Last phase reached before an abort (the current phase otherwise).
    pub fn last_completed(&self) -> &WorkflowPhase {
        &self.last_completed
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn advance(&mut self, next: WorkflowPhase) -> Result<(), RotationError> {
        if !self.phase.can_advance_to(&next) {
            return Err(RotationError::State(format!("{} -> {next}", self.phase)));
        }
        if !matches!(next, WorkflowPhase::Aborted { .. }) {
            self.last_completed = next.clone();
        }
        self.transitions.push(PhaseTransition {
            phase: next.clone(),
            at: Utc::now(),
        });
        self.phase = next;
        Ok(())
    }

    /// Move to `ABORTED(reason)`. Returns false when the run is already
    /// terminal in a way that cannot be aborted.
    pub fn abort(&mut self, reason: impl Into<String>) -> bool {
        self.advance(WorkflowPhase::Aborted {
            reason: reason.into(),
        })
        .is_ok()
    }

    pub fn record_backup(&mut self, refs: BackupRefs) -> Result<(), RotationError> {
        if self.backup_refs.is_some() {
            return Err(RotationError::State(
                "backup already recorded for this run".to_string(),
            ));
        }
        self.backup_refs = Some(refs);
        Ok(())
    }

    pub fn backup_refs(&self) -> Option<&BackupRefs> {
        self.backup_refs.as_ref()
    }

    pub fn select_retiring(&mut self, name: impl Into<String>) -> Result<(), RotationError> {
        if self.retiring_cert_name.is_some() {
            return Err(RotationError::State(
                "retiring certificate already selected".to_string(),
            ));
        }
        self.retiring_cert_name = Some(name.into());
        Ok(())
    }

    pub fn retiring_cert_name(&self) -> Option<&str> {
        self.retiring_cert_name.as_deref()
    }

    pub fn freeze_usage(&mut self, usage: UsageSet) -> Result<(), RotationError> {
        if self.usage_set.is_some() {
            return Err(RotationError::State(
                "usage set already discovered for this run".to_string(),
            ));
        }
        self.usage_set = Some(usage);
        Ok(())
    }

    pub fn usage_set(&self) -> Option<&UsageSet> {
        self.usage_set.as_ref()
    }

    pub fn set_unmanaged(&mut self, locations: Vec<String>) {
        self.unmanaged = locations;
    }

    pub fn unmanaged(&self) -> &[String] {
        &self.unmanaged
    }

    pub fn record_upload(&mut self, receipt: &UploadReceipt) {
        self.upload_status = UploadStatus::Done;
        self.chain = receipt.chain().clone();
    }

    pub fn record_upload_failure(&mut self, reason: impl Into<String>) {
        self.upload_status = UploadStatus::Failed {
            reason: reason.into(),
        };
    }

    pub fn upload_status(&self) -> &UploadStatus {
        &self.upload_status
    }

    pub fn chain(&self) -> &ChainStatus {
        &self.chain
    }

    pub fn open_ledger(&mut self, ledger: UpdateLedger) {
        self.ledger = Some(ledger);
    }

    pub fn ledger(&self) -> Option<&UpdateLedger> {
        self.ledger.as_ref()
    }

    pub fn ledger_mut(&mut self) -> Option<&mut UpdateLedger> {
        self.ledger.as_mut()
    }

    pub fn set_commit_status(&mut self, status: CommitStatus) {
        self.commit_status = status;
    }

    pub fn commit_status(&self) -> &CommitStatus {
        &self.commit_status
    }

    pub fn push_discrepancy(&mut self, discrepancy: Discrepancy) {
        self.discrepancies.push(discrepancy);
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RotationState {
        RotationState::new(
            TargetIdentity {
                host: "fw01".into(),
                credential: "LUFR...emh0".into(),
            },
            "new-wildcard",
        )
    }

    fn usage(names: &[&str]) -> UsageSet {
        names
            .iter()
            .map(|n| UsageReference::new(UsageKind::SslProfile, *n))
            .collect()
    }

    #[test]
    fn phases_follow_the_documented_order() {
        let mut s = state();
        assert!(s.advance(WorkflowPhase::CertUploaded).is_err());
        s.advance(WorkflowPhase::BackedUp).unwrap();
        s.advance(WorkflowPhase::CertSelected).unwrap();
        s.advance(WorkflowPhase::UsageMapped).unwrap();
        s.advance(WorkflowPhase::CertUploaded).unwrap();
        s.advance(WorkflowPhase::ConsumersUpdated {
            result: SweepResult::Complete,
        })
        .unwrap();
        s.advance(WorkflowPhase::CommitSubmitted).unwrap();
        s.advance(WorkflowPhase::Committed).unwrap();
        s.advance(WorkflowPhase::Verified).unwrap();

        assert!(!s.abort("late"));
        assert_eq!(s.phase(), &WorkflowPhase::Verified);
        assert_eq!(s.transitions().len(), 9);
    }

    #[test]
    fn partial_sweep_cannot_reach_commit() {
        let partial = WorkflowPhase::ConsumersUpdated {
            result: SweepResult::Partial,
        };
        assert!(!partial.can_advance_to(&WorkflowPhase::CommitSubmitted));
        assert_eq!(partial.to_string(), "CONSUMERS_UPDATED(partial)");
    }

    #[test]
    fn abort_keeps_last_completed_phase() {
        let mut s = state();
        s.advance(WorkflowPhase::BackedUp).unwrap();
        assert!(s.abort("selection cancelled"));
        assert_eq!(s.last_completed(), &WorkflowPhase::BackedUp);
        assert_eq!(s.phase().name(), "ABORTED");
        assert!(s.advance(WorkflowPhase::CertSelected).is_err());
    }

    #[test]
    fn write_once_fields_reject_second_write() {
        let mut s = state();
        let refs = BackupRefs {
            config_export: "a.xml".into(),
            device_state: "a.tgz".into(),
            config_bytes: 1,
            device_state_bytes: 1,
            taken_at: Utc::now(),
        };
        s.record_backup(refs.clone()).unwrap();
        assert!(s.record_backup(refs).is_err());

        s.select_retiring("old-wildcard").unwrap();
        assert!(s.select_retiring("other").is_err());
        assert_eq!(s.retiring_cert_name(), Some("old-wildcard"));

        s.freeze_usage(usage(&["edge-profile"])).unwrap();
        assert!(s.freeze_usage(UsageSet::default()).is_err());
    }

    #[test]
    fn permit_requires_every_reference_done() {
        let receipt = UploadReceipt::new("new-wildcard", ChainStatus::NotProvided);
        let set = usage(&["edge-profile", "mgmt-profile"]);
        let mut ledger = UpdateLedger::open(&receipt, "old-wildcard", &set);
        assert!(ledger.commit_permit().is_none());

        let edge = UsageReference::new(UsageKind::SslProfile, "edge-profile");
        let mgmt = UsageReference::new(UsageKind::SslProfile, "mgmt-profile");
        ledger.record(&edge, UpdateOutcome::Done).unwrap();
        ledger
            .record(
                &mgmt,
                UpdateOutcome::Failed {
                    reason: "timeout".into(),
                },
            )
            .unwrap();
        assert!(ledger.commit_permit().is_none());
        assert_eq!(ledger.remediation(), vec![mgmt.clone()]);
        assert_eq!(ledger.sweep_result(), SweepResult::Partial);

        ledger.record(&mgmt, UpdateOutcome::Done).unwrap();
        assert_eq!(ledger.commit_permit().map(|p| p.references()), Some(2));

        let stranger = UsageReference::new(UsageKind::Portal, "gp");
        assert!(ledger.record(&stranger, UpdateOutcome::Done).is_err());
    }

    #[test]
    fn empty_usage_set_permits_commit() {
        let receipt = UploadReceipt::new("new-wildcard", ChainStatus::NotProvided);
        let ledger = UpdateLedger::open(&receipt, "old-wildcard", &UsageSet::default());
        assert!(ledger.commit_permit().is_some());
    }
}
