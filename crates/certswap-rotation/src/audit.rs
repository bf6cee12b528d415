//! Append-only audit log of rotation runs.
//!
//! One line per event, never rewritten. Every line names the appliance so a
//! single log can cover several firewalls:
//!
//! ```text
//! 2026-02-11T10:30:00Z | backed_up | host=fw01 | config=backups/fw01-config-20260211_103000.xml | device_state=...
//! 2026-02-11T10:31:12Z | consumers_updated | host=fw01 | result=partial | ssl_profile/edge-profile=done | ssl_profile/mgmt-profile=failed(timeout)
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use certswap_store::JobHandle;

use crate::report::RunOutcome;
use crate::state::{BackupRefs, ChainStatus, SweepResult, UpdateLedger, UsageSet, WorkflowPhase};

const AUDIT_FILENAME: &str = "certswap-audit.log";

/// Path to the audit log inside `log_dir`.
pub fn audit_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(AUDIT_FILENAME)
}

/// Something worth a line in the audit log.
#[derive(Debug, Clone, Copy)]
pub enum AuditEvent<'a> {
    RunStarted {
        operator: &'a str,
        new_cert: &'a str,
        dry_run: bool,
    },
    /// Restore point taken by `certswap backup`, outside a rotation.
    BackupOnly { refs: &'a BackupRefs },
    BackedUp { refs: &'a BackupRefs },
    CertSelected { retiring: &'a str },
    UsageMapped { usage: &'a UsageSet },
    DryRunComplete { planned: usize },
    CertUploaded {
        cert: &'a str,
        chain: &'a ChainStatus,
    },
    ConsumersUpdated { ledger: &'a UpdateLedger },
    /// `job` is `None` when the appliance had nothing to commit.
    CommitSubmitted { job: Option<&'a JobHandle> },
    Committed,
    VerificationMismatch { count: usize },
    Verified,
    Aborted {
        last_phase: &'a str,
        reason: &'a str,
        backup: Option<&'a BackupRefs>,
    },
    RunFinished {
        outcome: RunOutcome,
        phase: &'a WorkflowPhase,
        exit_code: u8,
    },
}

impl AuditEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::BackupOnly { .. } => "backup_only",
            Self::BackedUp { .. } => "backed_up",
            Self::CertSelected { .. } => "cert_selected",
            Self::UsageMapped { .. } => "usage_mapped",
            Self::DryRunComplete { .. } => "dry_run_complete",
            Self::CertUploaded { .. } => "cert_uploaded",
            Self::ConsumersUpdated { .. } => "consumers_updated",
            Self::CommitSubmitted { .. } => "commit_submitted",
            Self::Committed => "committed",
            Self::VerificationMismatch { .. } => "verification_mismatch",
            Self::Verified => "verified",
            Self::Aborted { .. } => "aborted",
            Self::RunFinished { .. } => "run_finished",
        }
    }

    fn fields(&self) -> Vec<(String, String)> {
        let field = |key: &str, value: String| (key.to_string(), value);
        match *self {
            Self::RunStarted {
                operator,
                new_cert,
                dry_run,
            } => vec![
                field("operator", operator.to_string()),
                field("new_cert", new_cert.to_string()),
                field("dry_run", dry_run.to_string()),
            ],
            Self::BackupOnly { refs } | Self::BackedUp { refs } => vec![
                field("config", refs.config_export.display().to_string()),
                field("device_state", refs.device_state.display().to_string()),
            ],
            Self::CertSelected { retiring } => vec![field("retiring", retiring.to_string())],
            Self::UsageMapped { usage } => vec![
                field("references", usage.len().to_string()),
                field(
                    "objects",
                    usage
                        .iter()
                        .map(|r| r.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            ],
            Self::DryRunComplete { planned } => {
                vec![field("planned_actions", planned.to_string())]
            }
            Self::CertUploaded { cert, chain } => {
                let chain = match chain {
                    ChainStatus::NotProvided => "none".to_string(),
                    ChainStatus::Imported { name } => name.clone(),
                    ChainStatus::Failed { name, .. } => format!("{name} failed"),
                };
                vec![field("cert", cert.to_string()), field("chain", chain)]
            }
            Self::ConsumersUpdated { ledger } => {
                let result = match ledger.sweep_result() {
                    SweepResult::Complete => "complete",
                    SweepResult::Partial => "partial",
                };
                let mut fields = vec![field("result", result.to_string())];
                fields.extend(
                    ledger
                        .entries()
                        .map(|(reference, outcome)| (reference.to_string(), outcome.to_string())),
                );
                fields
            }
            Self::CommitSubmitted { job } => vec![field(
                "job",
                job.map(|j| j.to_string()).unwrap_or_else(|| "none".to_string()),
            )],
            Self::Committed | Self::Verified => Vec::new(),
            Self::VerificationMismatch { count } => vec![field("count", count.to_string())],
            Self::Aborted {
                last_phase,
                reason,
                backup,
            } => vec![
                field("last_phase", last_phase.to_string()),
                field("reason", reason.to_string()),
                field(
                    "backup",
                    backup
                        .map(|b| b.config_export.display().to_string())
                        .unwrap_or_else(|| "none".to_string()),
                ),
            ],
            Self::RunFinished {
                outcome,
                phase,
                exit_code,
            } => vec![
                field("outcome", outcome.as_str().to_string()),
                field("phase", phase.to_string()),
                field("exit_code", exit_code.to_string()),
            ],
        }
    }
}

/// Render one line. Field values come from appliance messages and paths,
/// so separators and line breaks inside them are flattened.
fn format_line(host: &str, event: &AuditEvent<'_>) -> String {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let mut line = format!("{timestamp} | {} | host={}", event.name(), flatten(host));
    for (key, value) in event.fields() {
        line.push_str(&format!(" | {key}={}", flatten(&value)));
    }
    line.push('\n');
    line
}

fn flatten(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            '|' => '/',
            other => other,
        })
        .collect()
}

/// Append `event` for `host` to the log at `path`.
pub fn append_entry_to(path: &Path, host: &str, event: &AuditEvent<'_>) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(format_line(host, event).as_bytes())?;

    tracing::debug!(event = event.name(), host, "Audit log entry written");
    Ok(())
}

/// Audit sink for one run.
///
/// A failed append is logged and does not stop the run.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: audit_log_path(log_dir),
        }
    }

    pub fn record(&self, host: &str, event: AuditEvent<'_>) {
        if let Err(e) = append_entry_to(&self.path, host, &event) {
            tracing::warn!(
                error = %e,
                path = %self.path.display(),
                event = event.name(),
                "Audit log write failed"
            );
        }
    }
}
