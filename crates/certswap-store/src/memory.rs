//! In-memory config store with a call log and failure injection.
//!
//! Holds a candidate and a running configuration tree the way the appliance
//! does: writes and imports land on the candidate, a successful commit job
//! copies the candidate over the running tree.
//!
//! Pending changes belong to the administrator owning the API key. When a
//! key owner is set, a partial commit scoped to anyone else leaves those
//! changes uncommitted.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::path::{ConfigPath, Segment};
use crate::store::{
    CommitScope, CommitSubmission, ConfigStore, ExportCategory, ImportCategory, ImportRequest,
    JobHandle, JobState, SystemInfo, WriteMode,
};
use crate::tree::{ConfigNode, ENTRY_TAG};

/// One observed call against the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    SystemInfo,
    Read(ConfigPath),
    ReadRunning(ConfigPath),
    Write { path: ConfigPath, mode: WriteMode },
    Import { category: ImportCategory, name: String },
    Export { category: ExportCategory, timeout: Duration },
    Commit { operator: String },
    JobStatus(JobHandle),
}

impl StoreCall {
    /// Calls that change the candidate configuration or try to activate it.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Write { .. } | Self::Import { .. } | Self::Commit { .. }
        )
    }
}

type Matcher = Box<dyn Fn(&StoreCall) -> bool + Send + Sync>;

struct Injected {
    matcher: Matcher,
    error: StoreError,
    remaining: Option<usize>,
}

struct Inner {
    candidate: ConfigNode,
    running: ConfigNode,
    calls: Vec<StoreCall>,
    failures: Vec<Injected>,
    job_script: VecDeque<JobState>,
    next_job: u64,
    /// Job id to (committing operator, whether it carries our changes).
    jobs: HashMap<JobHandle, (String, bool)>,
    pending: bool,
    key_owner: Option<String>,
    foreign_pending: BTreeSet<String>,
    exports: Vec<(ExportCategory, Vec<u8>)>,
    info: SystemInfo,
    write_delay: Option<Duration>,
    path_delays: Vec<(ConfigPath, Duration)>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Store whose running and candidate configurations are both `config`.
    pub fn new(config: ConfigNode) -> Self {
        Self {
            inner: Mutex::new(Inner {
                candidate: config.clone(),
                running: config,
                calls: Vec::new(),
                failures: Vec::new(),
                job_script: VecDeque::new(),
                next_job: 1,
                jobs: HashMap::new(),
                pending: false,
                key_owner: None,
                foreign_pending: BTreeSet::new(),
                exports: Vec::new(),
                info: SystemInfo {
                    hostname: "memory-fw".to_string(),
                    model: "PA-VM".to_string(),
                    sw_version: "11.1.0".to_string(),
                },
                write_delay: None,
                path_delays: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every call matching `matcher` with `error`.
    pub fn fail_when<F>(&self, matcher: F, error: StoreError)
    where
        F: Fn(&StoreCall) -> bool + Send + Sync + 'static,
    {
        self.lock().failures.push(Injected {
            matcher: Box::new(matcher),
            error,
            remaining: None,
        });
    }

    /// Fail only the first call matching `matcher`.
    pub fn fail_once_when<F>(&self, matcher: F, error: StoreError)
    where
        F: Fn(&StoreCall) -> bool + Send + Sync + 'static,
    {
        self.lock().failures.push(Injected {
            matcher: Box::new(matcher),
            error,
            remaining: Some(1),
        });
    }

    /// States returned by successive `job_status` calls. The last state
    /// repeats; an empty script reports success immediately.
    pub fn script_jobs(&self, states: impl IntoIterator<Item = JobState>) {
        self.lock().job_script = states.into_iter().collect();
    }

    /// Administrator the API key belongs to. Unset, any commit scope
    /// carries the pending changes.
    pub fn set_key_owner(&self, operator: impl Into<String>) {
        self.lock().key_owner = Some(operator.into());
    }

    /// Pending changes of another administrator, outside the candidate tree.
    pub fn add_foreign_pending(&self, operator: impl Into<String>) {
        self.lock().foreign_pending.insert(operator.into());
    }

    /// Body returned by exports of `category` instead of the generated one.
    pub fn set_export(&self, category: ExportCategory, body: Vec<u8>) {
        let mut inner = self.lock();
        inner.exports.retain(|(c, _)| *c != category);
        inner.exports.push((category, body));
    }

    /// Simulated latency for writes, to exercise concurrent sweeps.
    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = Some(delay);
    }

    /// Latency for writes to `path` only; overrides [`Self::set_write_delay`].
    pub fn set_path_write_delay(&self, path: ConfigPath, delay: Duration) {
        self.lock().path_delays.push((path, delay));
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn candidate(&self) -> ConfigNode {
        self.lock().candidate.clone()
    }

    pub fn running(&self) -> ConfigNode {
        self.lock().running.clone()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.lock().pending
    }

    /// Record `call` and return the injected failure for it, if any.
    fn observe(&self, call: StoreCall) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.push(call.clone());
        for injected in inner.failures.iter_mut() {
            if injected.remaining == Some(0) || !(injected.matcher)(&call) {
                continue;
            }
            if let Some(n) = injected.remaining.as_mut() {
                *n -= 1;
            }
            return Err(injected.error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn system_info(&self) -> Result<SystemInfo, StoreError> {
        self.observe(StoreCall::SystemInfo)?;
        Ok(self.lock().info.clone())
    }

    async fn read(&self, path: &ConfigPath) -> Result<Option<ConfigNode>, StoreError> {
        self.observe(StoreCall::Read(path.clone()))?;
        let inner = self.lock();
        Ok(node_at(&inner.candidate, path).cloned())
    }

    async fn read_running(&self, path: &ConfigPath) -> Result<Option<ConfigNode>, StoreError> {
        self.observe(StoreCall::ReadRunning(path.clone()))?;
        let inner = self.lock();
        Ok(node_at(&inner.running, path).cloned())
    }

    async fn write(
        &self,
        path: &ConfigPath,
        element: &ConfigNode,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        self.observe(StoreCall::Write {
            path: path.clone(),
            mode,
        })?;
        let delay = {
            let inner = self.lock();
            inner
                .path_delays
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, d)| *d)
                .or(inner.write_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        check_root(&inner.candidate, path)?;
        match mode {
            WriteMode::Create => {
                let target = ensure_path(&mut inner.candidate, path);
                merge_child(target, element);
            }
            WriteMode::Replace => {
                let last = path
                    .segments()
                    .last()
                    .ok_or_else(|| StoreError::rejected("empty xpath"))?;
                if !segment_matches(element, last) {
                    return Err(StoreError::rejected(format!(
                        "edit element <{}> does not match xpath {path}",
                        element.tag
                    )));
                }
                let target = ensure_path(&mut inner.candidate, path);
                *target = element.clone();
            }
        }
        inner.pending = true;
        Ok(())
    }

    async fn import(&self, request: &ImportRequest) -> Result<(), StoreError> {
        self.observe(StoreCall::Import {
            category: request.category,
            name: request.name.clone(),
        })?;
        if request.pem.is_empty() {
            return Err(StoreError::rejected("Import failed: empty file"));
        }

        let mut entry =
            ConfigNode::entry(request.name.clone()).with_child(ConfigNode::leaf("format", "pem"));
        if request.category == ImportCategory::Keypair {
            entry = entry.with_child(ConfigNode::leaf("private-key", "*****"));
        }

        let mut inner = self.lock();
        let certificates = ensure_path(
            &mut inner.candidate,
            &ConfigPath::shared().child("certificate"),
        );
        certificates
            .children
            .retain(|c| !(c.tag == ENTRY_TAG && c.name() == Some(request.name.as_str())));
        certificates.children.push(entry);
        inner.pending = true;
        Ok(())
    }

    async fn export(
        &self,
        category: ExportCategory,
        timeout: Duration,
    ) -> Result<Vec<u8>, StoreError> {
        self.observe(StoreCall::Export { category, timeout })?;
        let inner = self.lock();
        if let Some((_, body)) = inner.exports.iter().find(|(c, _)| *c == category) {
            return Ok(body.clone());
        }
        Ok(match category {
            ExportCategory::Configuration => inner.running.to_xml().into_bytes(),
            ExportCategory::DeviceState => b"device-state-archive".to_vec(),
        })
    }

    async fn commit(&self, scope: &CommitScope) -> Result<CommitSubmission, StoreError> {
        self.observe(StoreCall::Commit {
            operator: scope.operator_name().to_string(),
        })?;
        let operator = scope.operator_name();
        let mut inner = self.lock();
        let carries_ours = inner.pending
            && inner
                .key_owner
                .as_deref()
                .map_or(true, |owner| owner == operator);
        if !carries_ours && !inner.foreign_pending.contains(operator) {
            return Ok(CommitSubmission::NothingToCommit);
        }
        let job = JobHandle(inner.next_job.to_string());
        inner.next_job += 1;
        inner
            .jobs
            .insert(job.clone(), (operator.to_string(), carries_ours));
        Ok(CommitSubmission::Queued { job })
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobState, StoreError> {
        self.observe(StoreCall::JobStatus(job.clone()))?;
        let mut inner = self.lock();
        let state = if inner.job_script.len() > 1 {
            inner.job_script.pop_front()
        } else {
            inner.job_script.front().cloned()
        }
        .unwrap_or(JobState::Succeeded);

        if state == JobState::Succeeded {
            if let Some((operator, carries_ours)) = inner.jobs.remove(job) {
                if carries_ours {
                    inner.running = inner.candidate.clone();
                    inner.pending = false;
                }
                inner.foreign_pending.remove(&operator);
            }
        }
        Ok(state)
    }
}

fn segment_matches(node: &ConfigNode, segment: &Segment) -> bool {
    node.tag == segment.tag
        && match &segment.name {
            Some(name) => node.name() == Some(name.as_str()),
            None => true,
        }
}

fn check_root(root: &ConfigNode, path: &ConfigPath) -> Result<(), StoreError> {
    match path.segments().first() {
        Some(first) if segment_matches(root, first) => Ok(()),
        _ => Err(StoreError::rejected(format!("invalid xpath {path}"))),
    }
}

fn node_at<'a>(root: &'a ConfigNode, path: &ConfigPath) -> Option<&'a ConfigNode> {
    let (first, rest) = path.segments().split_first()?;
    if !segment_matches(root, first) {
        return None;
    }
    rest.iter().try_fold(root, |node, segment| {
        node.children.iter().find(|c| segment_matches(c, segment))
    })
}

fn ensure_path<'a>(root: &'a mut ConfigNode, path: &ConfigPath) -> &'a mut ConfigNode {
    let mut node = root;
    for segment in path.segments().iter().skip(1) {
        let idx = match node.children.iter().position(|c| segment_matches(c, segment)) {
            Some(idx) => idx,
            None => {
                let mut created = ConfigNode::new(segment.tag.clone());
                if let Some(name) = &segment.name {
                    created.attributes.insert("name".to_string(), name.clone());
                }
                node.children.push(created);
                node.children.len() - 1
            }
        };
        node = &mut node.children[idx];
    }
    node
}

/// `set` semantics: merge `element` into `target` as a child, matching
/// existing children by tag and entry name.
fn merge_child(target: &mut ConfigNode, element: &ConfigNode) {
    let existing = target
        .children
        .iter_mut()
        .find(|c| c.tag == element.tag && c.name() == element.name());
    match existing {
        Some(existing) => {
            if element.text.is_some() {
                existing.text = element.text.clone();
            }
            for (key, value) in &element.attributes {
                existing.attributes.insert(key.clone(), value.clone());
            }
            for child in &element.children {
                merge_child(existing, child);
            }
        }
        None => target.children.push(element.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigNode {
        ConfigNode::new("config").with_child(
            ConfigNode::new("shared").with_child(
                ConfigNode::new("ssl-tls-service-profile").with_child(
                    ConfigNode::entry("edge-profile")
                        .with_child(ConfigNode::leaf("certificate", "old-wildcard"))
                        .with_child(ConfigNode::leaf("protocol-settings", "tls1-2")),
                ),
            ),
        )
    }

    fn edge_path() -> ConfigPath {
        ConfigPath::shared()
            .child("ssl-tls-service-profile")
            .entry("edge-profile")
    }

    #[tokio::test]
    async fn reads_nodes_by_path() {
        let store = MemoryStore::new(sample());
        let node = store.read(&edge_path()).await.unwrap().unwrap();
        assert_eq!(node.child_text("certificate"), Some("old-wildcard"));

        let missing = ConfigPath::shared().child("certificate");
        assert!(store.read(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_merges_and_keeps_siblings() {
        let store = MemoryStore::new(sample());
        store
            .write(
                &edge_path(),
                &ConfigNode::leaf("certificate", "new-wildcard"),
                WriteMode::Create,
            )
            .await
            .unwrap();

        let node = store.read(&edge_path()).await.unwrap().unwrap();
        assert_eq!(node.child_text("certificate"), Some("new-wildcard"));
        assert_eq!(node.child_text("protocol-settings"), Some("tls1-2"));
        assert!(store.has_pending_changes());
    }

    #[tokio::test]
    async fn replace_requires_matching_element() {
        let store = MemoryStore::new(sample());
        let path = edge_path().child("certificate");
        let err = store
            .write(&path, &ConfigNode::leaf("issuer", "x"), WriteMode::Replace)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));

        store
            .write(
                &path,
                &ConfigNode::leaf("certificate", "new-wildcard"),
                WriteMode::Replace,
            )
            .await
            .unwrap();
        let node = store.read(&edge_path()).await.unwrap().unwrap();
        assert_eq!(node.child_text("certificate"), Some("new-wildcard"));
    }

    #[tokio::test]
    async fn commit_applies_candidate_after_successful_job() {
        let store = MemoryStore::new(sample());
        assert_eq!(
            store.commit(&CommitScope::operator("ops")).await.unwrap(),
            CommitSubmission::NothingToCommit
        );

        store
            .write(
                &edge_path(),
                &ConfigNode::leaf("certificate", "new-wildcard"),
                WriteMode::Create,
            )
            .await
            .unwrap();
        store.script_jobs([JobState::Running { progress: Some(10) }, JobState::Succeeded]);

        let CommitSubmission::Queued { job } =
            store.commit(&CommitScope::operator("ops")).await.unwrap()
        else {
            panic!("expected queued commit");
        };
        assert_eq!(
            store.job_status(&job).await.unwrap(),
            JobState::Running { progress: Some(10) }
        );
        assert_ne!(store.running(), store.candidate());
        assert_eq!(store.job_status(&job).await.unwrap(), JobState::Succeeded);
        assert_eq!(store.running(), store.candidate());
        assert!(!store.has_pending_changes());
    }

    #[tokio::test]
    async fn commit_scoped_to_another_operator_leaves_our_changes_pending() {
        let store = MemoryStore::new(sample());
        store.set_key_owner("certbot");
        store.add_foreign_pending("admin");
        store
            .write(
                &edge_path(),
                &ConfigNode::leaf("certificate", "new-wildcard"),
                WriteMode::Create,
            )
            .await
            .unwrap();

        let CommitSubmission::Queued { job } =
            store.commit(&CommitScope::operator("admin")).await.unwrap()
        else {
            panic!("expected queued commit");
        };
        assert_eq!(store.job_status(&job).await.unwrap(), JobState::Succeeded);
        assert!(store.has_pending_changes());
        let running = store.read_running(&edge_path()).await.unwrap().unwrap();
        assert_eq!(running.child_text("certificate"), Some("old-wildcard"));
        let candidate = store.read(&edge_path()).await.unwrap().unwrap();
        assert_eq!(candidate.child_text("certificate"), Some("new-wildcard"));

        let CommitSubmission::Queued { job } =
            store.commit(&CommitScope::operator("certbot")).await.unwrap()
        else {
            panic!("expected queued commit");
        };
        store.job_status(&job).await.unwrap();
        let running = store.read_running(&edge_path()).await.unwrap().unwrap();
        assert_eq!(running.child_text("certificate"), Some("new-wildcard"));
    }

    #[tokio::test]
    async fn injected_failures_are_recorded_and_counted() {
        let store = MemoryStore::new(sample());
        store.fail_once_when(
            |call| {
                matches!(
                    call,
                    StoreCall::Export {
                        category: ExportCategory::DeviceState,
                        ..
                    }
                )
            },
            StoreError::Timeout { secs: 300 },
        );

        let first = store
            .export(ExportCategory::DeviceState, Duration::from_secs(1))
            .await;
        assert_eq!(first, Err(StoreError::Timeout { secs: 300 }));
        let second = store
            .export(ExportCategory::DeviceState, Duration::from_secs(1))
            .await;
        assert!(second.is_ok());
        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn import_adds_shared_certificate_entry() {
        let store = MemoryStore::new(sample());
        store
            .import(&ImportRequest {
                category: ImportCategory::Keypair,
                name: "new-wildcard".to_string(),
                pem: b"-----BEGIN CERTIFICATE-----".to_vec(),
                passphrase: None,
            })
            .await
            .unwrap();
        let path = ConfigPath::shared().child("certificate").entry("new-wildcard");
        let entry = store.read(&path).await.unwrap().unwrap();
        assert_eq!(entry.child_text("private-key"), Some("*****"));
        assert!(store.calls().iter().any(StoreCall::is_mutation));
    }
}
