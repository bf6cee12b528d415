//! Subcommand handlers. Each returns the process exit status.

pub mod backup;
pub mod certs;
pub mod prompt;
pub mod rotate;

use std::time::Duration;

use certswap_common::redact::redact_key;
use certswap_rotation::TargetIdentity;
use certswap_store::panos::{PanosClient, PanosConfig};

use crate::cli::ConnectArgs;

/// Build the XML API client for `args`.
pub(crate) fn connect(args: &ConnectArgs) -> anyhow::Result<PanosClient> {
    let mut config = PanosConfig::new(args.host.as_str(), args.api_key.as_str());
    config.verify_tls = args.verify_tls;
    config.request_timeout = Duration::from_secs(args.request_timeout.max(1));
    Ok(PanosClient::new(config)?)
}

pub(crate) fn target_identity(args: &ConnectArgs) -> TargetIdentity {
    TargetIdentity {
        host: args.host.clone(),
        credential: redact_key(&args.api_key),
    }
}

/// Print a serializable value as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
