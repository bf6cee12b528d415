use std::path::PathBuf;
use std::time::Duration;

use certswap_common::paths::{DEFAULT_BACKUP_DIR, DEFAULT_LOG_DIR};

pub const DEFAULT_VSYS: &str = "vsys1";
pub const DEFAULT_CONFIG_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DEVICE_STATE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_COMMIT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Tunables for one rotation run.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Administrator whose pending changes the commit is scoped to.
    pub operator: String,
    pub new_cert_name: String,
    pub vsys: String,
    pub backup_dir: PathBuf,
    /// Directory of the audit log.
    pub log_dir: PathBuf,
    pub config_export_timeout: Duration,
    pub device_state_timeout: Duration,
    pub commit_poll_interval: Duration,
    pub commit_timeout: Duration,
    /// Consecutive job status errors tolerated while polling.
    pub max_poll_errors: u32,
    pub concurrency: usize,
    pub visibility_attempts: u32,
    pub visibility_delay: Duration,
    pub verify: bool,
    pub dry_run: bool,
    /// Write `<host>-rotation-<ts>.json` next to the backups.
    pub write_report: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            operator: String::new(),
            new_cert_name: String::new(),
            vsys: DEFAULT_VSYS.to_string(),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            config_export_timeout: DEFAULT_CONFIG_EXPORT_TIMEOUT,
            device_state_timeout: DEFAULT_DEVICE_STATE_TIMEOUT,
            commit_poll_interval: DEFAULT_COMMIT_POLL_INTERVAL,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            max_poll_errors: 3,
            concurrency: DEFAULT_CONCURRENCY,
            visibility_attempts: 3,
            visibility_delay: Duration::from_secs(2),
            verify: true,
            dry_run: false,
            write_report: true,
        }
    }
}
