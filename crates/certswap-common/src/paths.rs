use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Default directory for configuration and device-state exports.
pub const DEFAULT_BACKUP_DIR: &str = "./backups";

/// Default directory for run logs and the audit log.
pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Timestamp format shared by every artifact of one run.
///
/// Example: `20260211_103000`
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Render a run timestamp for use in file names.
pub fn artifact_timestamp(at: DateTime<Local>) -> String {
    at.format(ARTIFACT_TIMESTAMP_FORMAT).to_string()
}

/// File system safe rendering of an appliance address.
///
/// IPv6 literals and `host:port` forms contain characters that are not
/// portable in file names.
pub fn host_slug(host: &str) -> String {
    host.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// `<dir>/<host>-config-<ts>.xml`
pub fn config_export_path(dir: &Path, host: &str, timestamp: &str) -> PathBuf {
    dir.join(format!("{}-config-{timestamp}.xml", host_slug(host)))
}

/// `<dir>/<host>-device-state-<ts>.tgz`
pub fn device_state_path(dir: &Path, host: &str, timestamp: &str) -> PathBuf {
    dir.join(format!("{}-device-state-{timestamp}.tgz", host_slug(host)))
}

/// `<dir>/<host>-rotation-<ts>.json`
pub fn rotation_report_path(dir: &Path, host: &str, timestamp: &str) -> PathBuf {
    dir.join(format!("{}-rotation-{timestamp}.json", host_slug(host)))
}

/// `<dir>/certswap-<ts>.log`
pub fn run_log_path(dir: &Path, timestamp: &str) -> PathBuf {
    dir.join(format!("certswap-{timestamp}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn artifact_names_share_timestamp() {
        let at = Local.with_ymd_and_hms(2026, 2, 11, 10, 30, 0).unwrap();
        let ts = artifact_timestamp(at);
        assert_eq!(ts, "20260211_103000");

        let dir = Path::new("/tmp/b");
        assert_eq!(
            config_export_path(dir, "fw01.example.com", &ts),
            PathBuf::from("/tmp/b/fw01.example.com-config-20260211_103000.xml")
        );
        assert_eq!(
            device_state_path(dir, "fw01.example.com", &ts),
            PathBuf::from("/tmp/b/fw01.example.com-device-state-20260211_103000.tgz")
        );
    }

    #[test]
    fn host_slug_replaces_unportable_characters() {
        assert_eq!(host_slug("10.0.0.1:8443"), "10.0.0.1_8443");
        assert_eq!(host_slug("[fe80::1]"), "_fe80__1_");
        assert_eq!(host_slug("fw-01.lan"), "fw-01.lan");
    }
}
