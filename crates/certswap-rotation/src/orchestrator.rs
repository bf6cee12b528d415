//! Drives one rotation run through its phases.
//!
//! Phases run strictly in order. Each one either advances the
//! [`RotationState`] or ends the run:
//!
//! ```text
//! INIT → BACKED_UP → CERT_SELECTED → USAGE_MAPPED → CERT_UPLOADED
//!      → CONSUMERS_UPDATED(partial|complete) → COMMIT_SUBMITTED → COMMITTED → VERIFIED
//! ```
//!
//! A partial consumer update is a terminal reporting state: nothing is
//! committed and the remediation list is returned. Every other failure
//! moves the run to `ABORTED` with the state kept for the report.

use chrono::Local;
use tokio_util::sync::CancellationToken;

use certswap_common::paths::{artifact_timestamp, rotation_report_path};
use certswap_common::persist::write_json_pretty;
use certswap_store::{CommitSubmission, ConfigStore};

use crate::audit::{AuditEvent, AuditLog};
use crate::backup::{BackupService, ExportTimeouts};
use crate::commit::CommitCoordinator;
use crate::config::RotationConfig;
use crate::error::RotationError;
use crate::inventory::{resolve_selection, CertificateInventory, CertificateSelector};
use crate::report::{RotationReport, RunOutcome};
use crate::state::{
    ChainStatus, CommitStatus, RotationState, SweepResult, TargetIdentity, UpdateLedger,
    WorkflowPhase,
};
use crate::update::ConsumerUpdater;
use crate::upload::{chain_name, inspect, CertificateMaterial, CertificateUploader, MaterialSummary};
use crate::usage::{scan_unmanaged, UsageResolver};
use crate::verify::Verifier;

/// Everything a run accumulates besides the state record.
struct Run {
    state: RotationState,
    material: Option<MaterialSummary>,
    plan: Vec<String>,
    warnings: Vec<String>,
}

impl Run {
    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

pub struct WorkflowOrchestrator<'a> {
    store: &'a dyn ConfigStore,
    target: TargetIdentity,
    config: RotationConfig,
    audit: AuditLog,
    cancel: CancellationToken,
}

impl<'a> WorkflowOrchestrator<'a> {
    pub fn new(
        store: &'a dyn ConfigStore,
        target: TargetIdentity,
        config: RotationConfig,
        audit: AuditLog,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            target,
            config,
            audit,
            cancel,
        }
    }

    /// Execute one rotation run. Never fails: every outcome, including an
    /// abort, is described by the returned report.
    pub async fn run(
        &self,
        selector: &dyn CertificateSelector,
        material: &CertificateMaterial,
    ) -> RotationReport {
        let timestamp = artifact_timestamp(Local::now());
        let mut run = Run {
            state: RotationState::new(self.target.clone(), self.config.new_cert_name.clone()),
            material: None,
            plan: Vec::new(),
            warnings: Vec::new(),
        };
        self.record(AuditEvent::RunStarted {
            operator: &self.config.operator,
            new_cert: &self.config.new_cert_name,
            dry_run: self.config.dry_run,
        });

        let result = self.drive(&mut run, selector, material, &timestamp).await;
        let (outcome, error) = match result {
            Ok(outcome) => (outcome, None),
            Err(e) => (self.conclude_failure(&mut run.state, &e), Some(e)),
        };

        let mut report = RotationReport::from_state(&run.state, outcome, error.as_ref());
        report.material = run.material;
        report.dry_run_plan = run.plan;
        report.warnings = run.warnings;

        self.record(AuditEvent::RunFinished {
            outcome,
            phase: run.state.phase(),
            exit_code: report.exit_code,
        });

        if self.config.write_report && !self.config.dry_run && run.state.backup_refs().is_some() {
            let path =
                rotation_report_path(&self.config.backup_dir, &self.target.host, &timestamp);
            report.report_path = Some(path.clone());
            if let Err(e) = write_json_pretty(&path, &report) {
                tracing::warn!(error = %e, path = %path.display(), "Could not write run report");
                report.report_path = None;
            }
        }
        report
    }

    async fn drive(
        &self,
        run: &mut Run,
        selector: &dyn CertificateSelector,
        material: &CertificateMaterial,
        timestamp: &str,
    ) -> Result<RunOutcome, RotationError> {
        let host = self.target.host.as_str();
        if self.config.operator.trim().is_empty() {
            return Err(RotationError::Config(
                "no administrator given to scope the commit to".to_string(),
            ));
        }

        // Pre-flight: nothing is written unless the appliance answers.
        let info = self
            .store
            .system_info()
            .await
            .map_err(RotationError::Connectivity)?;
        tracing::info!(
            host,
            hostname = %info.hostname,
            model = %info.model,
            sw_version = %info.sw_version,
            "Connected to appliance"
        );

        let summary = inspect(material)?;
        tracing::info!(
            common_name = summary.common_name.as_deref().unwrap_or("-"),
            not_after = %summary.not_after,
            "Replacement certificate validated"
        );
        run.material = Some(summary);

        self.checkpoint()?;
        let backup = BackupService::new(
            self.store,
            &self.config.backup_dir,
            host,
            ExportTimeouts {
                configuration: self.config.config_export_timeout,
                device_state: self.config.device_state_timeout,
            },
        )
        .backup(timestamp)
        .await?;
        self.record(AuditEvent::BackedUp { refs: &backup.refs });
        run.state.record_backup(backup.refs)?;
        run.state.advance(WorkflowPhase::BackedUp)?;

        self.checkpoint()?;
        let inventory = CertificateInventory::new(self.store).list().await?;
        let retiring = resolve_selection(
            selector.select(&inventory).await,
            &inventory,
            &self.config.new_cert_name,
        )?;
        if inventory.iter().any(|c| c.name == self.config.new_cert_name) {
            run.warn(format!(
                "a certificate named `{}` already exists and will be replaced by the import",
                self.config.new_cert_name
            ));
        }
        run.state.select_retiring(retiring.clone())?;
        run.state.advance(WorkflowPhase::CertSelected)?;
        self.record(AuditEvent::CertSelected { retiring: &retiring });

        self.checkpoint()?;
        let usage = UsageResolver::new(self.store, self.config.vsys.as_str())
            .find_usage(&retiring)
            .await?;
        let unmanaged = match &backup.config {
            Some(export) => scan_unmanaged(export, &retiring),
            None => {
                run.warn(format!(
                    "configuration export could not be parsed; other references to `{retiring}` were not searched"
                ));
                Vec::new()
            }
        };
        for location in &unmanaged {
            run.warn(format!(
                "`{retiring}` is also referenced at {location}; update it manually"
            ));
        }
        if usage.is_empty() {
            run.warn(format!(
                "no profile, portal or gateway references `{retiring}`; the new certificate will be uploaded but not applied"
            ));
        }
        self.record(AuditEvent::UsageMapped { usage: &usage });
        run.state.set_unmanaged(unmanaged);
        run.state.freeze_usage(usage)?;
        run.state.advance(WorkflowPhase::UsageMapped)?;

        if self.config.dry_run {
            self.plan(run, &retiring);
            self.record(AuditEvent::DryRunComplete {
                planned: run.plan.len(),
            });
            return Ok(RunOutcome::DryRun);
        }

        self.checkpoint()?;
        let uploader = CertificateUploader::new(
            self.store,
            self.config.visibility_attempts,
            self.config.visibility_delay,
        );
        let receipt = match uploader.upload(&self.config.new_cert_name, material).await {
            Ok(receipt) => receipt,
            Err(e) => {
                run.state.record_upload_failure(e.to_string());
                return Err(RotationError::Upload(e));
            }
        };
        run.state.record_upload(&receipt);
        if let ChainStatus::Failed { name, reason } = receipt.chain() {
            run.warn(format!("chain `{name}` was not imported: {reason}"));
        }
        run.state.advance(WorkflowPhase::CertUploaded)?;
        self.record(AuditEvent::CertUploaded {
            cert: receipt.cert_name(),
            chain: receipt.chain(),
        });

        let usage = run
            .state
            .usage_set()
            .cloned()
            .unwrap_or_default();
        let mut ledger = UpdateLedger::open(&receipt, &retiring, &usage);
        let sweep = ConsumerUpdater::new(
            self.store,
            self.config.vsys.as_str(),
            self.config.concurrency,
        )
        .sweep(&mut ledger, &self.cancel)
        .await;
        self.record(AuditEvent::ConsumersUpdated { ledger: &ledger });
        let remaining = ledger.remediation().len();
        let total = ledger.len();
        run.state.open_ledger(ledger);
        run.state.advance(WorkflowPhase::ConsumersUpdated {
            result: sweep.result,
        })?;

        if sweep.result == SweepResult::Partial {
            if sweep.skipped > 0 && self.cancel.is_cancelled() {
                return Err(RotationError::Cancelled);
            }
            return Err(RotationError::PartialUpdate {
                failed: remaining,
                total,
            });
        }

        self.checkpoint()?;
        let permit = run
            .state
            .ledger()
            .and_then(UpdateLedger::commit_permit)
            .ok_or_else(|| RotationError::State("commit without a complete ledger".to_string()))?;
        let coordinator = CommitCoordinator::new(
            self.store,
            &self.config.operator,
            self.config.commit_poll_interval,
            self.config.commit_timeout,
            self.config.max_poll_errors,
        );
        let submission = match coordinator.submit(permit).await {
            Ok(submission) => submission,
            Err(e) => {
                run.state.set_commit_status(CommitStatus::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        run.state.advance(WorkflowPhase::CommitSubmitted)?;
        match submission {
            CommitSubmission::Queued { job } => {
                run.state
                    .set_commit_status(CommitStatus::Submitted { job: job.clone() });
                self.record(AuditEvent::CommitSubmitted { job: Some(&job) });
                match coordinator.wait(&job).await {
                    Ok(()) => run.state.set_commit_status(CommitStatus::Succeeded),
                    Err(e) => {
                        let status = match &e {
                            RotationError::CommitTimeout { .. } => CommitStatus::Unknown { job },
                            other => CommitStatus::Failed {
                                reason: other.to_string(),
                            },
                        };
                        run.state.set_commit_status(status);
                        return Err(e);
                    }
                }
            }
            CommitSubmission::NothingToCommit => {
                run.warn("the appliance reported no pending changes to commit".to_string());
                self.record(AuditEvent::CommitSubmitted { job: None });
                run.state.set_commit_status(CommitStatus::Succeeded);
            }
        }
        run.state.advance(WorkflowPhase::Committed)?;
        self.record(AuditEvent::Committed);

        if !self.config.verify {
            return Ok(RunOutcome::Committed);
        }

        let discrepancies = Verifier::new(self.store, self.config.vsys.as_str())
            .verify(&usage, &retiring, &self.config.new_cert_name)
            .await;
        if !discrepancies.is_empty() {
            let count = discrepancies.len();
            for discrepancy in discrepancies {
                run.state.push_discrepancy(discrepancy);
            }
            self.record(AuditEvent::VerificationMismatch { count });
            return Err(RotationError::VerificationMismatch { count });
        }
        run.state.advance(WorkflowPhase::Verified)?;
        self.record(AuditEvent::Verified);
        Ok(RunOutcome::Verified)
    }

    /// Record the mutating steps a live run would take.
    fn plan(&self, run: &mut Run, retiring: &str) {
        let new = self.config.new_cert_name.as_str();
        let mut plan = vec![format!("import keypair `{new}`")];
        if run.material.as_ref().is_some_and(|m| m.has_chain) {
            plan.push(format!("import chain `{}`", chain_name(new)));
        }
        if let Some(usage) = run.state.usage_set() {
            plan.extend(
                usage
                    .iter()
                    .map(|r| format!("repoint {r} from `{retiring}` to `{new}`")),
            );
        }
        plan.push(format!(
            "commit pending changes of administrator `{}`",
            self.config.operator
        ));
        for step in &plan {
            tracing::info!(step = %step, "Dry run: would perform");
        }
        run.plan = plan;
    }

    fn record(&self, event: AuditEvent<'_>) {
        self.audit.record(&self.target.host, event);
    }

    fn checkpoint(&self) -> Result<(), RotationError> {
        if self.cancel.is_cancelled() {
            return Err(RotationError::Cancelled);
        }
        Ok(())
    }

    fn conclude_failure(&self, state: &mut RotationState, error: &RotationError) -> RunOutcome {
        let outcome = match error {
            RotationError::PartialUpdate { .. } => {
                tracing::error!(error = %error, "Consumer update incomplete, not committing");
                return RunOutcome::Partial;
            }
            RotationError::VerificationMismatch { .. } => {
                tracing::error!(error = %error, "Committed, but read-back does not match");
                return RunOutcome::Unverified;
            }
            RotationError::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::Aborted,
        };

        let reason = match error {
            RotationError::Commit(_) | RotationError::CommitTimeout { .. } => {
                format!("{error}; restore from the backup if the change must be undone")
            }
            other => other.to_string(),
        };
        let last = state.last_completed().to_string();
        state.abort(reason.clone());
        tracing::error!(last_phase = %last, reason = %reason, "Rotation aborted");

        self.record(AuditEvent::Aborted {
            last_phase: &last,
            reason: &reason,
            backup: state.backup_refs(),
        });
        outcome
    }
}
