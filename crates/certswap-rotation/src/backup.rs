//! Restore point taken before any mutation.
//!
//! Two exports share one timestamp: the configuration (XML) and the device
//! state archive. Both are stored exactly as received. The device state
//! export can take minutes and has its own, longer timeout.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use certswap_common::paths::{config_export_path, device_state_path};
use certswap_common::persist::write_bytes_atomic;
use certswap_store::{ConfigNode, ConfigStore, ExportCategory};

use crate::error::RotationError;
use crate::state::BackupRefs;

/// Artifacts of a successful backup. The parsed configuration export is
/// kept for the unmanaged reference scan; `None` when it did not parse.
#[derive(Debug, Clone)]
pub struct BackupOutput {
    pub refs: BackupRefs,
    pub config: Option<ConfigNode>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExportTimeouts {
    pub configuration: Duration,
    pub device_state: Duration,
}

pub struct BackupService<'a> {
    store: &'a dyn ConfigStore,
    dir: PathBuf,
    host: String,
    timeouts: ExportTimeouts,
}

impl<'a> BackupService<'a> {
    pub fn new(
        store: &'a dyn ConfigStore,
        dir: impl Into<PathBuf>,
        host: impl Into<String>,
        timeouts: ExportTimeouts,
    ) -> Self {
        Self {
            store,
            dir: dir.into(),
            host: host.into(),
            timeouts,
        }
    }

    /// Export both archives and write them under the backup directory.
    /// Any failure is a [`RotationError::Backup`].
    pub async fn backup(&self, timestamp: &str) -> Result<BackupOutput, RotationError> {
        let config_path = config_export_path(&self.dir, &self.host, timestamp);
        let state_path = device_state_path(&self.dir, &self.host, timestamp);

        tracing::info!(path = %config_path.display(), "Exporting configuration");
        let config_bytes = self
            .store
            .export(ExportCategory::Configuration, self.timeouts.configuration)
            .await
            .map_err(|e| backup_error("configuration export", e))?;
        let config_size = write_bytes_atomic(&config_path, &config_bytes)
            .map_err(|e| backup_error("configuration export", e))?;
        let config = parse_export(&config_bytes);

        tracing::info!(
            path = %state_path.display(),
            timeout_secs = self.timeouts.device_state.as_secs(),
            "Exporting device state (this can take several minutes)"
        );
        let state_bytes = self
            .store
            .export(ExportCategory::DeviceState, self.timeouts.device_state)
            .await
            .map_err(|e| backup_error("device state export", e))?;
        if state_bytes.is_empty() {
            return Err(backup_error("device state export", "empty archive"));
        }
        let state_size = write_bytes_atomic(&state_path, &state_bytes)
            .map_err(|e| backup_error("device state export", e))?;

        tracing::info!(
            config_bytes = config_size,
            device_state_bytes = state_size,
            "Backup complete"
        );
        Ok(BackupOutput {
            refs: BackupRefs {
                config_export: config_path,
                device_state: state_path,
                config_bytes: config_size,
                device_state_bytes: state_size,
                taken_at: Utc::now(),
            },
            config,
        })
    }
}

fn parse_export(bytes: &[u8]) -> Option<ConfigNode> {
    let parsed = std::str::from_utf8(bytes)
        .map_err(|e| e.to_string())
        .and_then(|xml| ConfigNode::parse(xml).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(error = %e, "Configuration export saved but not readable as XML");
            None
        }
    }
}

fn backup_error(artifact: &'static str, reason: impl std::fmt::Display) -> RotationError {
    RotationError::Backup {
        artifact,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certswap_common::test::temp_dir;
    use certswap_store::memory::{MemoryStore, StoreCall};
    use certswap_store::StoreError;

    fn store() -> MemoryStore {
        MemoryStore::new(ConfigNode::new("config").with_child(ConfigNode::new("shared")))
    }

    fn timeouts(secs: u64) -> ExportTimeouts {
        ExportTimeouts {
            configuration: Duration::from_secs(30),
            device_state: Duration::from_secs(secs),
        }
    }

    #[tokio::test]
    async fn writes_both_artifacts_with_one_timestamp() {
        let dir = temp_dir("backup-ok");
        let store = store();
        let service = BackupService::new(&store, &dir, "fw01", timeouts(5));

        let out = service.backup("20260211_103000").await.unwrap();
        assert_eq!(
            out.refs.config_export,
            dir.join("fw01-config-20260211_103000.xml")
        );
        assert_eq!(
            out.refs.device_state,
            dir.join("fw01-device-state-20260211_103000.tgz")
        );
        assert_eq!(
            std::fs::read(&out.refs.device_state).unwrap(),
            b"device-state-archive"
        );
        assert!(out.config.unwrap().child("shared").is_some());
        assert!(!store.calls().iter().any(StoreCall::is_mutation));
    }

    #[tokio::test]
    async fn device_state_timeout_is_a_backup_error() {
        let dir = temp_dir("backup-timeout");
        let store = store();
        store.fail_when(
            |c| {
                matches!(
                    c,
                    StoreCall::Export {
                        category: ExportCategory::DeviceState,
                        ..
                    }
                )
            },
            StoreError::Timeout { secs: 300 },
        );
        let service = BackupService::new(&store, &dir, "fw01", timeouts(300));

        let err = service.backup("20260211_103000").await.unwrap_err();
        assert!(matches!(
            err,
            RotationError::Backup {
                artifact: "device state export",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unparseable_config_export_is_still_saved() {
        let dir = temp_dir("backup-opaque");
        let store = store();
        let export = vec![0xff, 0xfe, b'<', b'c'];
        store.set_export(ExportCategory::Configuration, export.clone());
        let service = BackupService::new(&store, &dir, "fw01", timeouts(5));

        let out = service.backup("20260211_103000").await.unwrap();
        assert!(out.config.is_none());
        assert_eq!(std::fs::read(&out.refs.config_export).unwrap(), export);
        assert_eq!(out.refs.config_bytes, 4);
        assert!(out.refs.device_state.exists());
    }

    #[tokio::test]
    async fn each_export_gets_its_own_timeout() {
        let dir = temp_dir("backup-timeouts");
        let store = store();
        let service = BackupService::new(&store, &dir, "fw01", timeouts(300));
        service.backup("20260211_103000").await.unwrap();

        let exports: Vec<_> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Export { category, timeout } => Some((category, timeout)),
                _ => None,
            })
            .collect();
        assert_eq!(
            exports,
            vec![
                (ExportCategory::Configuration, Duration::from_secs(30)),
                (ExportCategory::DeviceState, Duration::from_secs(300)),
            ]
        );
    }
}
