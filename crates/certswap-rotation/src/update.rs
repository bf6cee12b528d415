//! Repointing of every discovered reference at the new certificate.

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use certswap_store::{ConfigStore, WriteMode};

use crate::error::ReferenceUpdateError;
use crate::layout;
use crate::state::{SweepResult, UpdateLedger, UpdateOutcome, UsageReference};

/// What a successful update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Repointed { elements: usize },
    AlreadyCurrent,
}

/// Result of one sweep over the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub result: SweepResult,
    pub done: usize,
    pub failed: usize,
    /// References never started because the sweep was cancelled.
    pub skipped: usize,
}

pub struct ConsumerUpdater<'a> {
    store: &'a dyn ConfigStore,
    vsys: String,
    concurrency: usize,
}

impl<'a> ConsumerUpdater<'a> {
    pub fn new(store: &'a dyn ConfigStore, vsys: impl Into<String>, concurrency: usize) -> Self {
        Self {
            store,
            vsys: vsys.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Rewrite one object from `retiring` to `new_cert_name`.
    ///
    /// Reads the object, rewrites its matching certificate elements and
    /// replaces it. An object already on the new certificate is left alone.
    pub async fn update(
        &self,
        reference: &UsageReference,
        retiring: &str,
        new_cert_name: &str,
    ) -> Result<UpdateAction, ReferenceUpdateError> {
        let path = layout::object_path(reference, &self.vsys);
        let mut entry = self
            .store
            .read(&path)
            .await?
            .ok_or(ReferenceUpdateError::Missing)?;

        if !layout::references(reference.kind, &entry, retiring) {
            if layout::references(reference.kind, &entry, new_cert_name) {
                return Ok(UpdateAction::AlreadyCurrent);
            }
            return Err(ReferenceUpdateError::NotReferenced {
                retiring: retiring.to_string(),
                new: new_cert_name.to_string(),
            });
        }

        let elements = layout::repoint(reference.kind, &mut entry, retiring, new_cert_name);
        self.store.write(&path, &entry, WriteMode::Replace).await?;
        Ok(UpdateAction::Repointed { elements })
    }

    /// Update every pending reference of `ledger`, at most `concurrency` at
    /// a time, and record each outcome.
    ///
    /// A failure never stops its siblings. Once `cancel` fires, updates
    /// already in flight finish and the rest stay pending.
    pub async fn sweep(&self, ledger: &mut UpdateLedger, cancel: &CancellationToken) -> SweepReport {
        let retiring = ledger.retiring_cert_name().to_string();
        let new_cert_name = ledger.new_cert_name().to_string();
        let pending = ledger.pending();
        tracing::info!(
            references = pending.len(),
            concurrency = self.concurrency,
            "Updating consumers"
        );

        let (retiring, new_cert_name) = (retiring.as_str(), new_cert_name.as_str());
        let outcomes: Vec<(UsageReference, Option<UpdateOutcome>)> = stream::iter(pending)
            .map(|reference| async move {
                if cancel.is_cancelled() {
                    return (reference, None);
                }
                let outcome = match self.update(&reference, retiring, new_cert_name).await {
                    Ok(action) => {
                        tracing::info!(reference = %reference, ?action, "Reference updated");
                        UpdateOutcome::Done
                    }
                    Err(e) => {
                        tracing::warn!(reference = %reference, error = %e, "Reference update failed");
                        UpdateOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                (reference, Some(outcome))
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = SweepReport {
            result: SweepResult::Complete,
            done: 0,
            failed: 0,
            skipped: 0,
        };
        for (reference, outcome) in outcomes {
            match outcome {
                Some(outcome) => {
                    if outcome.is_done() {
                        report.done += 1;
                    } else {
                        report.failed += 1;
                    }
                    let recorded = ledger.record(&reference, outcome);
                    debug_assert!(recorded.is_ok(), "{reference} is not in the ledger");
                }
                None => report.skipped += 1,
            }
        }
        report.result = ledger.sweep_result();
        report
    }
}
