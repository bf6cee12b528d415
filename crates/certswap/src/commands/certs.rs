//! `certswap certs`: read-only inventory listing.

use chrono::Utc;

use certswap_rotation::CertificateInventory;
use certswap_store::ConfigStore;

use crate::cli::{Cli, ConnectArgs};
use crate::commands::{connect, print_json};
use crate::format;

pub async fn certs(args: &ConnectArgs, cli: &Cli) -> anyhow::Result<u8> {
    let client = connect(args)?;
    let info = client.system_info().await?;
    tracing::info!(hostname = %info.hostname, sw_version = %info.sw_version, "Connected to appliance");

    let inventory = CertificateInventory::new(&client).list().await?;
    if cli.json {
        print_json(&inventory)?;
    } else if inventory.is_empty() {
        println!("No certificates on {}.", info.hostname);
    } else {
        format::certificate_list(&inventory, Utc::now());
    }
    Ok(0)
}
