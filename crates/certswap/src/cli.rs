use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use certswap_common::paths::{DEFAULT_BACKUP_DIR, DEFAULT_LOG_DIR};
use certswap_rotation::config::{
    DEFAULT_COMMIT_POLL_INTERVAL, DEFAULT_COMMIT_TIMEOUT, DEFAULT_CONCURRENCY,
    DEFAULT_DEVICE_STATE_TIMEOUT, DEFAULT_VSYS,
};
use certswap_rotation::RotationConfig;

#[derive(Parser)]
#[command(
    name = "certswap",
    version,
    about = "Rotate TLS certificates on PAN-OS firewalls"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "CERTSWAP_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory for the run log and the audit log
    #[arg(long, env = "CERTSWAP_LOG_DIR", default_value = DEFAULT_LOG_DIR, global = true)]
    pub log_dir: PathBuf,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replace a certificate everywhere it is used, then commit
    Rotate(RotateArgs),
    /// List the certificates on the firewall
    Certs(ConnectArgs),
    /// Take a configuration and device state backup only
    Backup(BackupArgs),
    /// Explain how to generate an API key
    ApiKeyHelp,
}

/// No `Debug`: holds the API key.
#[derive(Args)]
pub struct ConnectArgs {
    /// Firewall hostname or IP address
    #[arg(long, env = "CERTSWAP_HOST")]
    pub host: String,

    /// PAN-OS API key (see `certswap api-key-help`)
    #[arg(long, env = "CERTSWAP_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Validate the management interface certificate
    #[arg(long)]
    pub verify_tls: bool,

    /// Timeout for ordinary API requests
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub request_timeout: u64,
}

#[derive(Args)]
pub struct BackupArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Directory for configuration and device state backups
    #[arg(long, env = "CERTSWAP_BACKUP_DIR", default_value = DEFAULT_BACKUP_DIR)]
    pub backup_dir: PathBuf,

    /// Upper bound for the device state export
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_DEVICE_STATE_TIMEOUT.as_secs())]
    pub device_state_timeout: u64,
}

#[derive(Args)]
pub struct RotateArgs {
    #[command(flatten)]
    pub backup: BackupArgs,

    /// Administrator the API key belongs to; the commit covers only this
    /// administrator's pending changes
    #[arg(long, env = "CERTSWAP_ADMIN")]
    pub admin: String,

    /// Name for the new certificate on the firewall
    #[arg(long)]
    pub cert_name: String,

    /// Public certificate (PEM)
    #[arg(long, value_name = "PATH")]
    pub cert_file: PathBuf,

    /// Private key (PEM)
    #[arg(long, value_name = "PATH")]
    pub key_file: PathBuf,

    /// Intermediate chain (PEM), imported as `<cert-name>-chain`
    #[arg(long, value_name = "PATH")]
    pub chain_file: Option<PathBuf>,

    /// Private key passphrase
    #[arg(long, env = "CERTSWAP_KEY_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Certificate to retire (skips the interactive prompt)
    #[arg(long, value_name = "NAME", conflicts_with = "retire_cn")]
    pub retire: Option<String>,

    /// Retire the soonest-expiring certificate with this common name
    #[arg(long, value_name = "CN")]
    pub retire_cn: Option<String>,

    /// Virtual system holding GlobalProtect portals and gateways
    #[arg(long, default_value = DEFAULT_VSYS)]
    pub vsys: String,

    /// Parallel consumer updates
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Give up waiting for the commit job after this long
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_COMMIT_TIMEOUT.as_secs())]
    pub commit_timeout: u64,

    /// Interval between commit job polls
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_COMMIT_POLL_INTERVAL.as_secs())]
    pub poll_interval: u64,

    /// Back up, discover and plan without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the read-back after the commit
    #[arg(long)]
    pub no_verify: bool,

    /// Do not write the JSON run report next to the backups
    #[arg(long)]
    pub no_report: bool,
}

impl RotateArgs {
    pub fn connect(&self) -> &ConnectArgs {
        &self.backup.connect
    }

    pub fn rotation_config(&self, log_dir: PathBuf) -> RotationConfig {
        RotationConfig {
            operator: self.admin.clone(),
            new_cert_name: self.cert_name.clone(),
            vsys: self.vsys.clone(),
            backup_dir: self.backup.backup_dir.clone(),
            log_dir,
            config_export_timeout: Duration::from_secs(self.connect().request_timeout),
            device_state_timeout: Duration::from_secs(self.backup.device_state_timeout),
            commit_poll_interval: Duration::from_secs(self.poll_interval.max(1)),
            commit_timeout: Duration::from_secs(self.commit_timeout),
            concurrency: self.concurrency.max(1),
            verify: !self.no_verify,
            dry_run: self.dry_run,
            write_report: !self.no_report,
            ..RotationConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn rotate_builds_rotation_config() {
        let cli = parse(&[
            "certswap",
            "rotate",
            "--host",
            "fw01",
            "--api-key",
            "LUFRPT14MW5xOEo1R09KVlBZNnpnemh0",
            "--admin",
            "certbot",
            "--cert-name",
            "new-wildcard",
            "--cert-file",
            "cert.pem",
            "--key-file",
            "key.pem",
            "--retire",
            "old-wildcard",
            "--no-verify",
            "--concurrency",
            "0",
        ]);
        let Command::Rotate(args) = cli.command else {
            panic!("expected rotate");
        };
        let config = args.rotation_config(cli.log_dir.clone());
        assert_eq!(config.new_cert_name, "new-wildcard");
        assert_eq!(config.operator, "certbot");
        assert_eq!(config.config_export_timeout, Duration::from_secs(30));
        assert_eq!(config.vsys, "vsys1");
        assert_eq!(config.concurrency, 1);
        assert!(!config.verify);
        assert!(config.write_report);
        assert_eq!(config.backup_dir, PathBuf::from(DEFAULT_BACKUP_DIR));
        assert_eq!(args.retire.as_deref(), Some("old-wildcard"));
    }

    #[test]
    fn rotate_requires_the_key_owner() {
        let result = Cli::try_parse_from([
            "certswap",
            "rotate",
            "--host",
            "fw01",
            "--api-key",
            "k",
            "--cert-name",
            "n",
            "--cert-file",
            "c",
            "--key-file",
            "k",
            "--retire",
            "a",
        ]);
        let err = result.err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert!(err.to_string().contains("--admin"));
    }

    #[test]
    fn retire_and_retire_cn_conflict() {
        let result = Cli::try_parse_from([
            "certswap",
            "rotate",
            "--host",
            "fw01",
            "--api-key",
            "k",
            "--admin",
            "certbot",
            "--cert-name",
            "n",
            "--cert-file",
            "c",
            "--key-file",
            "k",
            "--retire",
            "a",
            "--retire-cn",
            "b",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = parse(&["certswap", "api-key-help", "--json", "-vv"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::ApiKeyHelp));
    }
}
