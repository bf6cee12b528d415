//! The config store capability.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::StoreError;
use crate::path::ConfigPath;
use crate::tree::ConfigNode;

/// How a write lands on the candidate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Merge `element` into the node at the path, creating it if missing.
    Create,
    /// Replace the node at the path with `element`.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportCategory {
    Configuration,
    DeviceState,
}

impl ExportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::DeviceState => "device-state",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportCategory {
    /// Certificate plus private key in one PEM payload.
    Keypair,
    /// Certificate(s) only, e.g. an intermediate chain.
    Certificate,
}

impl ImportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keypair => "keypair",
            Self::Certificate => "certificate",
        }
    }
}

/// Named-object import.
pub struct ImportRequest {
    pub category: ImportCategory,
    pub name: String,
    pub pem: Vec<u8>,
    pub passphrase: Option<Zeroizing<String>>,
}

impl fmt::Debug for ImportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportRequest")
            .field("category", &self.category)
            .field("name", &self.name)
            .field("pem_len", &self.pem.len())
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Commit scope. Only the acting operator's own pending changes can be
/// expressed; there is no constructor for a full commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitScope {
    operator: String,
}

impl CommitScope {
    pub fn operator(name: impl Into<String>) -> Self {
        Self {
            operator: name.into(),
        }
    }

    pub fn operator_name(&self) -> &str {
        &self.operator
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CommitSubmission {
    Queued { job: JobHandle },
    NothingToCommit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    Running { progress: Option<u8> },
    Succeeded,
    Failed { details: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub model: String,
    pub sw_version: String,
}

/// Authenticated request/response channel to one appliance.
///
/// One instance serves exactly one rotation run; implementations hold the
/// session state (credentials, HTTP connection pool) for that run only.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Connectivity and authentication probe.
    async fn system_info(&self) -> Result<SystemInfo, StoreError>;

    /// Read the node at `path` from the candidate configuration. `Ok(None)`
    /// when nothing is configured there.
    async fn read(&self, path: &ConfigPath) -> Result<Option<ConfigNode>, StoreError>;

    /// Read the node at `path` from the running (committed) configuration.
    async fn read_running(&self, path: &ConfigPath) -> Result<Option<ConfigNode>, StoreError>;

    async fn write(
        &self,
        path: &ConfigPath,
        element: &ConfigNode,
        mode: WriteMode,
    ) -> Result<(), StoreError>;

    async fn import(&self, request: &ImportRequest) -> Result<(), StoreError>;

    /// Export a full archive. `timeout` bounds the whole transfer.
    async fn export(
        &self,
        category: ExportCategory,
        timeout: Duration,
    ) -> Result<Vec<u8>, StoreError>;

    async fn commit(&self, scope: &CommitScope) -> Result<CommitSubmission, StoreError>;

    async fn job_status(&self, job: &JobHandle) -> Result<JobState, StoreError>;
}
