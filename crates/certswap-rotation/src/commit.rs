//! Operator-scoped commit and job polling.

use std::time::Duration;

use tokio::time::Instant;

use certswap_store::{CommitScope, CommitSubmission, ConfigStore, JobHandle, JobState};

use crate::error::RotationError;
use crate::state::CommitPermit;

pub struct CommitCoordinator<'a> {
    store: &'a dyn ConfigStore,
    scope: CommitScope,
    poll_interval: Duration,
    timeout: Duration,
    max_poll_errors: u32,
}

impl<'a> CommitCoordinator<'a> {
    pub fn new(
        store: &'a dyn ConfigStore,
        operator: &str,
        poll_interval: Duration,
        timeout: Duration,
        max_poll_errors: u32,
    ) -> Self {
        Self {
            store,
            scope: CommitScope::operator(operator),
            poll_interval,
            timeout,
            max_poll_errors,
        }
    }

    /// Submit a commit of the operator's own pending changes. Consumes the
    /// permit so one sweep yields at most one commit.
    pub async fn submit(&self, permit: CommitPermit) -> Result<CommitSubmission, RotationError> {
        tracing::info!(
            operator = self.scope.operator_name(),
            references = permit.references(),
            "Submitting operator-scoped commit"
        );
        self.store
            .commit(&self.scope)
            .await
            .map_err(|e| RotationError::Commit(e.to_string()))
    }

    /// Poll `job` until it is terminal or the timeout elapses.
    pub async fn wait(&self, job: &JobHandle) -> Result<(), RotationError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut consecutive_errors = 0u32;

        loop {
            match self.store.job_status(job).await {
                Ok(JobState::Succeeded) => {
                    tracing::info!(job = %job, elapsed_secs = started.elapsed().as_secs(), "Commit succeeded");
                    return Ok(());
                }
                Ok(JobState::Failed { details }) => {
                    tracing::error!(job = %job, details = %details, "Commit failed");
                    return Err(RotationError::Commit(details));
                }
                Ok(JobState::Running { progress }) => {
                    consecutive_errors = 0;
                    tracing::info!(job = %job, progress = progress.unwrap_or(0), "Commit in progress");
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(job = %job, error = %e, attempt = consecutive_errors, "Job status query failed");
                    if consecutive_errors >= self.max_poll_errors {
                        return Err(self.unknown(job, started));
                    }
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(self.unknown(job, started));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn unknown(&self, job: &JobHandle, started: Instant) -> RotationError {
        RotationError::CommitTimeout {
            secs: started.elapsed().as_secs(),
            job: job.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certswap_store::memory::MemoryStore;
    use certswap_store::{ConfigNode, StoreError, WriteMode};

    use crate::state::{ChainStatus, UpdateLedger, UploadReceipt, UsageSet};

    fn permit() -> CommitPermit {
        let receipt = UploadReceipt::new("new", ChainStatus::NotProvided);
        UpdateLedger::open(&receipt, "old", &UsageSet::default())
            .commit_permit()
            .unwrap()
    }

    async fn dirty_store() -> MemoryStore {
        let store = MemoryStore::new(ConfigNode::new("config"));
        store
            .write(
                &certswap_store::ConfigPath::shared(),
                &ConfigNode::leaf("x", "y"),
                WriteMode::Create,
            )
            .await
            .unwrap();
        store
    }

    fn coordinator(store: &MemoryStore, timeout: Duration) -> CommitCoordinator<'_> {
        CommitCoordinator::new(store, "ops", Duration::from_millis(1), timeout, 3)
    }

    #[tokio::test]
    async fn waits_through_running_states() {
        let store = dirty_store().await;
        store.script_jobs([
            JobState::Running { progress: Some(20) },
            JobState::Running { progress: Some(80) },
            JobState::Succeeded,
        ]);
        let commit = coordinator(&store, Duration::from_secs(5));

        let CommitSubmission::Queued { job } = commit.submit(permit()).await.unwrap() else {
            panic!("expected a queued job");
        };
        commit.wait(&job).await.unwrap();
        assert!(!store.has_pending_changes());
    }

    #[tokio::test]
    async fn failed_job_is_a_commit_error() {
        let store = dirty_store().await;
        store.script_jobs([JobState::Failed {
            details: "Validation Error: profile missing".into(),
        }]);
        let commit = coordinator(&store, Duration::from_secs(5));
        let err = commit.wait(&JobHandle("7".into())).await.unwrap_err();
        assert!(matches!(err, RotationError::Commit(d) if d.contains("Validation Error")));
    }

    #[tokio::test]
    async fn endless_running_times_out() {
        let store = dirty_store().await;
        store.script_jobs([JobState::Running { progress: None }]);
        let commit = coordinator(&store, Duration::from_millis(20));
        let err = commit.wait(&JobHandle("7".into())).await.unwrap_err();
        assert!(matches!(err, RotationError::CommitTimeout { job, .. } if job == "7"));
    }

    #[tokio::test]
    async fn repeated_poll_errors_make_status_unknown() {
        let store = dirty_store().await;
        store.fail_when(
            |c| matches!(c, certswap_store::memory::StoreCall::JobStatus(_)),
            StoreError::Connectivity("reset".into()),
        );
        let commit = coordinator(&store, Duration::from_secs(5));
        let err = commit.wait(&JobHandle("7".into())).await.unwrap_err();
        assert!(matches!(err, RotationError::CommitTimeout { .. }));
    }
}
