//! Human-readable CLI output.
//!
//! JSON output bypasses this module and serializes the report directly.
//! Prompts and listings that precede a decision go to stderr so that
//! stdout carries only the result.

use chrono::{DateTime, Utc};

use certswap_rotation::report::RotationReport;
use certswap_rotation::state::{BackupRefs, ChainStatus, CommitStatus, UploadStatus};
use certswap_rotation::{CertificateSummary, RunOutcome, UpdateOutcome};

const RULE: &str = "================================================================================";

/// Certificates expiring sooner than this are flagged in listings.
const EXPIRY_WARNING_DAYS: i64 = 30;

/// Numbered inventory listing.
pub fn certificate_list(inventory: &[CertificateSummary], now: DateTime<Utc>) {
    eprintln!("{RULE}");
    eprintln!("CERTIFICATES ON FIREWALL");
    eprintln!("{RULE}");
    for (idx, cert) in inventory.iter().enumerate() {
        eprintln!("\n{}. {}{}", idx + 1, cert.name, expiry_flag(cert, now));
        eprintln!("   Common Name: {}", cert.common_name.as_deref().unwrap_or("-"));
        eprintln!("   Issuer:      {}", cert.issuer.as_deref().unwrap_or("-"));
        eprintln!("   Expiry:      {}", cert.expiry.as_deref().unwrap_or("-"));
        if !cert.has_private_key {
            eprintln!("   (no private key)");
        }
    }
    eprintln!("\n{RULE}");
}

fn expiry_flag(cert: &CertificateSummary, now: DateTime<Utc>) -> &'static str {
    if cert.is_expired(now) {
        "  [EXPIRED]"
    } else if cert.expires_within(now, EXPIRY_WARNING_DAYS) {
        "  [expires soon]"
    } else {
        ""
    }
}

pub fn backup_summary(refs: &BackupRefs) {
    println!("Backup complete");
    println!(
        "  Configuration: {} ({} bytes)",
        refs.config_export.display(),
        refs.config_bytes
    );
    println!(
        "  Device state:  {} ({} bytes)",
        refs.device_state.display(),
        refs.device_state_bytes
    );
}

/// End-of-run summary: outcome, restore point, per-reference results and
/// what is left to do by hand.
pub fn rotation_report(report: &RotationReport) {
    println!("\n{RULE}");
    println!("{}", headline(report.outcome));
    println!("{RULE}");
    println!("  Firewall:        {}", report.host);
    println!("  Phase:           {}", report.phase);
    println!("  Last completed:  {}", report.last_completed_phase);
    if let Some(retiring) = &report.retiring_cert {
        println!("  Retiring:        {retiring}");
    }
    println!("  New certificate: {}", report.new_cert);

    if let Some(backup) = &report.backup {
        println!("\nBackups");
        println!("  Configuration:   {}", backup.config_export.display());
        println!("  Device state:    {}", backup.device_state.display());
    }

    if !report.dry_run_plan.is_empty() {
        println!("\nPlanned changes (dry run)");
        for step in &report.dry_run_plan {
            println!("  - {step}");
        }
    }

    match &report.upload {
        UploadStatus::NotStarted => {}
        UploadStatus::Done => println!("\nUpload: {} imported", report.new_cert),
        UploadStatus::Failed { reason } => println!("\nUpload failed: {reason}"),
    }
    match &report.chain {
        ChainStatus::NotProvided => {}
        ChainStatus::Imported { name } => println!("  Chain: {name} imported"),
        ChainStatus::Failed { name, reason } => println!("  Chain: {name} failed ({reason})"),
    }

    if !report.updates.is_empty() {
        println!("\nReferences");
        for update in &report.updates {
            let marker = match update.outcome {
                UpdateOutcome::Done => "+",
                UpdateOutcome::Pending => " ",
                UpdateOutcome::Failed { .. } => "-",
            };
            println!("  [{marker}] {}  {}", update.reference, update.outcome);
        }
    } else if report.dry_run_plan.is_empty() && !report.usage.is_empty() {
        println!("\nReferences");
        for reference in &report.usage {
            println!("  [ ] {reference}");
        }
    }

    match &report.commit {
        CommitStatus::NotAttempted => {}
        CommitStatus::Submitted { job } => println!("\nCommit: job {job} submitted"),
        CommitStatus::Succeeded => println!("\nCommit: succeeded"),
        CommitStatus::Failed { reason } => println!("\nCommit failed: {reason}"),
        CommitStatus::Unknown { job } => {
            println!("\nCommit: status unknown, check job {job} on the firewall")
        }
    }

    if !report.discrepancies.is_empty() {
        println!("\nRead-back mismatches");
        for d in &report.discrepancies {
            println!("  {}: {}", d.reference, d.detail);
        }
    }

    if !report.remediation.is_empty() {
        println!("\nStill on {} (update manually or re-run):", retiring_name(report));
        for reference in &report.remediation {
            println!("  {reference}");
        }
    }
    if !report.unmanaged.is_empty() {
        println!("\nOther references not handled by certswap:");
        for location in &report.unmanaged {
            println!("  {location}");
        }
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings");
        for warning in &report.warnings {
            println!("  {warning}");
        }
    }
    if let Some(error) = &report.error {
        println!("\nError: {}", error.message);
    }
    if let Some(path) = &report.report_path {
        println!("\nReport written to {}", path.display());
    }
    println!("{RULE}");
}

fn headline(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Verified => "ROTATION COMPLETE (verified)",
        RunOutcome::Committed => "ROTATION COMMITTED (not verified)",
        RunOutcome::Unverified => "ROTATION COMMITTED, READ-BACK MISMATCH",
        RunOutcome::DryRun => "DRY RUN COMPLETE, nothing was changed",
        RunOutcome::Partial => "PARTIAL UPDATE, nothing was committed",
        RunOutcome::Cancelled => "CANCELLED",
        RunOutcome::Aborted => "ROTATION ABORTED",
    }
}

fn retiring_name(report: &RotationReport) -> &str {
    report.retiring_cert.as_deref().unwrap_or("the retiring certificate")
}

pub fn api_key_help() {
    println!("{RULE}");
    println!("HOW TO GET YOUR API KEY");
    println!("{RULE}");
    println!(
        r#"
Generate a key for the administrator that will own the commit:

  curl -k -X POST 'https://<FIREWALL>/api/?type=keygen' \
       --data-urlencode 'user=<USERNAME>' \
       --data-urlencode 'password=<PASSWORD>'

The response carries the key:

  <response status="success">
    <result>
      <key>LUFRPT14MW5xOEo1R09KVlBZNnpnemh0VHRBOWl6TGM9...</key>
    </result>
  </response>

Pass it with --api-key or the CERTSWAP_API_KEY environment variable.
Commits are scoped to the administrator given with --admin, which should be
the same account the key was generated for.

Keep the key out of shell history and version control.
"#
    );
    println!("{RULE}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(expires_at: Option<DateTime<Utc>>) -> CertificateSummary {
        CertificateSummary {
            name: "old-wildcard".to_string(),
            common_name: Some("*.example.com".to_string()),
            issuer: None,
            expiry: None,
            expires_at,
            has_private_key: true,
        }
    }

    #[test]
    fn expiry_flags() {
        let now = Utc.with_ymd_and_hms(2026, 2, 11, 10, 0, 0).unwrap();
        let soon = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(expiry_flag(&summary(Some(soon)), now), "  [expires soon]");
        assert_eq!(expiry_flag(&summary(Some(later)), now), "");
        assert_eq!(expiry_flag(&summary(Some(past)), now), "  [EXPIRED]");
        assert_eq!(expiry_flag(&summary(None), now), "");
    }
}
