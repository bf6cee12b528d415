//! `certswap backup`: restore point without a rotation.

use std::time::Duration;

use chrono::Local;

use certswap_common::paths::artifact_timestamp;
use certswap_rotation::audit::{AuditEvent, AuditLog};
use certswap_rotation::backup::{BackupService, ExportTimeouts};
use certswap_store::ConfigStore;

use crate::cli::{BackupArgs, Cli};
use crate::commands::{connect, print_json};
use crate::format;

pub async fn backup(args: &BackupArgs, cli: &Cli) -> anyhow::Result<u8> {
    let client = connect(&args.connect)?;
    client.system_info().await?;

    let timestamp = artifact_timestamp(Local::now());
    let output = BackupService::new(
        &client,
        &args.backup_dir,
        args.connect.host.as_str(),
        ExportTimeouts {
            configuration: Duration::from_secs(args.connect.request_timeout),
            device_state: Duration::from_secs(args.device_state_timeout),
        },
    )
    .backup(&timestamp)
    .await?;

    AuditLog::new(&cli.log_dir).record(
        &args.connect.host,
        AuditEvent::BackupOnly { refs: &output.refs },
    );

    if cli.json {
        print_json(&output.refs)?;
    } else {
        format::backup_summary(&output.refs);
    }
    Ok(0)
}
