use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fresh, empty directory under the system temp dir.
///
/// Each call gets its own nanosecond suffix so parallel tests never share
/// backup or log directories.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "certswap-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    let _ = std::fs::create_dir_all(&dir);
    dir
}
