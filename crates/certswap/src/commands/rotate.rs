//! `certswap rotate`

use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use certswap_rotation::audit::AuditLog;
use certswap_rotation::{
    CertificateMaterial, CertificateSelector, CommonNameSelector, NamedSelector,
    WorkflowOrchestrator,
};

use crate::cli::{Cli, RotateArgs};
use crate::commands::prompt::PromptSelector;
use crate::commands::{connect, print_json, target_identity};
use crate::format;

pub async fn rotate(args: &RotateArgs, cli: &Cli, cancel: CancellationToken) -> anyhow::Result<u8> {
    let material = CertificateMaterial::from_files(
        &args.cert_file,
        &args.key_file,
        args.chain_file.as_deref(),
        args.passphrase.clone().map(Zeroizing::new),
    )?;
    let selector = selector(args, &cancel);

    let client = connect(args.connect())?;
    let config = args.rotation_config(cli.log_dir.clone());
    let audit = AuditLog::new(&config.log_dir);
    tracing::info!(
        host = %args.connect().host,
        new_cert = %config.new_cert_name,
        dry_run = config.dry_run,
        "Starting certificate rotation"
    );

    let orchestrator =
        WorkflowOrchestrator::new(&client, target_identity(args.connect()), config, audit, cancel);
    let report = orchestrator.run(selector.as_ref(), &material).await;

    if cli.json {
        print_json(&report)?;
    } else {
        format::rotation_report(&report);
    }
    Ok(report.exit_code)
}

fn selector(args: &RotateArgs, cancel: &CancellationToken) -> Box<dyn CertificateSelector> {
    match (&args.retire, &args.retire_cn) {
        (Some(name), _) => Box::new(NamedSelector(name.clone())),
        (None, Some(cn)) => Box::new(CommonNameSelector {
            common_name: cn.clone(),
            exclude: Some(args.cert_name.clone()),
        }),
        (None, None) => Box::new(PromptSelector::new(cancel.clone())),
    }
}
