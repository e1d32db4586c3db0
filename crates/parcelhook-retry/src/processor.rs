//! Replays due retry records through the callback flow.
//!
//! Records are processed sequentially, earliest deadline first, each one
//! independently. The cadence lives outside this module: callers invoke
//! [`process_due_retries`] directly or run a [`crate::worker::RetryWorker`].
//!
//! ```text
//! pending --success------------------------------> succeeded
//! pending --failure, budget left-----------------> pending (attempts + 1)
//! pending --failure, budget spent----------------> exhausted (attempts + 1)
//! pending --shipment missing---------------------> exhausted
//! pending --attempts already at budget-----------> exhausted (no replay)
//! ```

use std::sync::Arc;

use parcelhook_core::{CallbackFlow, CoreError, RetryRecord, ShipmentRepository};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    backoff::RetryPolicy,
    classify::{classify, FailureClass},
    error::Result,
    store::RetryStore,
};

/// Final state a record reached in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Rescheduled,
    Exhausted,
}

/// Counts for a single pass over the due records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Records fetched from the store.
    pub fetched: usize,
    /// Records whose transition was persisted.
    pub processed: usize,
    /// Records that replayed successfully.
    pub succeeded: usize,
    /// Records rescheduled after a failed replay.
    pub rescheduled: usize,
    /// Records dead-lettered.
    pub exhausted: usize,
    /// Records whose transition could not be persisted.
    pub store_failures: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Rescheduled => self.rescheduled += 1,
            Outcome::Exhausted => self.exhausted += 1,
        }
    }
}

/// Cumulative counts across passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// Completed passes.
    pub batches: u64,
    /// Records whose transition was persisted.
    pub processed: u64,
    /// Records that replayed successfully.
    pub succeeded: u64,
    /// Records rescheduled after a failed replay.
    pub rescheduled: u64,
    /// Records dead-lettered.
    pub exhausted: u64,
    /// Records whose transition could not be persisted.
    pub store_failures: u64,
}

impl ProcessorStats {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.processed += report.processed as u64;
        self.succeeded += report.succeeded as u64;
        self.rescheduled += report.rescheduled as u64;
        self.exhausted += report.exhausted as u64;
        self.store_failures += report.store_failures as u64;
    }
}

/// Processes up to `limit` due records and returns how many were processed.
///
/// A record counts as processed once its transition is persisted. A failed
/// `mark_*` call is logged, leaves the record pending for a later pass and
/// does not stop the batch.
///
/// # Errors
///
/// Returns `RetryError::Storage` if the due records cannot be fetched.
pub async fn process_due_retries(
    store: &dyn RetryStore,
    repository: &dyn ShipmentRepository,
    flow: &dyn CallbackFlow,
    policy: &RetryPolicy,
    limit: usize,
) -> Result<usize> {
    run_batch(store, repository, flow, policy, limit).await.map(|report| report.processed)
}

async fn run_batch(
    store: &dyn RetryStore,
    repository: &dyn ShipmentRepository,
    flow: &dyn CallbackFlow,
    policy: &RetryPolicy,
    limit: usize,
) -> Result<BatchReport> {
    let due = store.get_due_retries(limit).await?;
    let mut report = BatchReport { fetched: due.len(), ..BatchReport::default() };

    if due.is_empty() {
        return Ok(report);
    }
    debug!(batch_size = due.len(), "processing due retries");

    for record in due {
        let retry_id = record.id;
        match replay(store, repository, flow, policy, record).await {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                report.store_failures += 1;
                error!(retry_id = %retry_id, error = %e, "failed to persist retry transition");
            },
        }
    }

    debug!(
        processed = report.processed,
        succeeded = report.succeeded,
        rescheduled = report.rescheduled,
        exhausted = report.exhausted,
        "retry batch complete"
    );
    Ok(report)
}

async fn replay(
    store: &dyn RetryStore,
    repository: &dyn ShipmentRepository,
    flow: &dyn CallbackFlow,
    policy: &RetryPolicy,
    record: RetryRecord,
) -> std::result::Result<Outcome, CoreError> {
    // A pass that died between mark_failed and mark_exhausted leaves the
    // record pending with a spent budget.
    if record.attempt_count() >= policy.max_attempts {
        store.mark_exhausted(record.id).await?;
        warn!(
            retry_id = %record.id,
            shipment_id = %record.shipment_id,
            attempts = record.attempts,
            "retry budget already spent, callback dead-lettered without replay"
        );
        return Ok(Outcome::Exhausted);
    }

    let shipment = match repository.find_by_id(&record.shipment_id).await {
        Ok(Some(shipment)) => shipment,
        Ok(None) => return dead_letter_missing(store, &record).await,
        Err(e) => {
            let reason = format!("shipment lookup failed: {e}");
            return record_failure(store, policy, &record, reason).await;
        },
    };

    match flow.handle_callback(&shipment, &record.payload, &record.headers).await {
        Ok(updated) => {
            store.mark_succeeded(record.id).await?;
            info!(
                retry_id = %record.id,
                shipment_id = %record.shipment_id,
                attempts = record.attempts,
                status = %updated.status,
                "retry succeeded"
            );
            Ok(Outcome::Succeeded)
        },
        Err(e) if classify(&e) == FailureClass::NotFound => {
            dead_letter_missing(store, &record).await
        },
        Err(e) => record_failure(store, policy, &record, e.to_string()).await,
    }
}

async fn dead_letter_missing(
    store: &dyn RetryStore,
    record: &RetryRecord,
) -> std::result::Result<Outcome, CoreError> {
    store.mark_exhausted(record.id).await?;
    warn!(
        retry_id = %record.id,
        shipment_id = %record.shipment_id,
        "shipment no longer exists, retry exhausted"
    );
    Ok(Outcome::Exhausted)
}

async fn record_failure(
    store: &dyn RetryStore,
    policy: &RetryPolicy,
    record: &RetryRecord,
    error: String,
) -> std::result::Result<Outcome, CoreError> {
    let attempts = record.attempt_count().saturating_add(1);
    store.mark_failed(record.id, error.clone()).await?;

    // Dead-lettered records keep the failure that exhausted them.
    if policy.exhausted_after_failure(record.attempt_count()) {
        store.mark_exhausted(record.id).await?;
        warn!(
            retry_id = %record.id,
            shipment_id = %record.shipment_id,
            attempts,
            error = %error,
            "retry budget spent, callback dead-lettered"
        );
        return Ok(Outcome::Exhausted);
    }

    debug!(retry_id = %record.id, attempts, error = %error, "retry rescheduled");
    Ok(Outcome::Rescheduled)
}

/// Owns the collaborators of the processing loop and accumulates stats.
pub struct RetryProcessor {
    store: Arc<dyn RetryStore>,
    repository: Arc<dyn ShipmentRepository>,
    flow: Arc<dyn CallbackFlow>,
    policy: RetryPolicy,
    batch_size: usize,
    stats: Arc<RwLock<ProcessorStats>>,
}

impl RetryProcessor {
    /// Creates a processor that fetches at most `batch_size` records a pass.
    pub fn new(
        store: Arc<dyn RetryStore>,
        repository: Arc<dyn ShipmentRepository>,
        flow: Arc<dyn CallbackFlow>,
        policy: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            repository,
            flow,
            policy,
            batch_size,
            stats: Arc::new(RwLock::new(ProcessorStats::default())),
        }
    }

    /// Runs one pass.
    ///
    /// # Errors
    ///
    /// Returns `RetryError::Storage` if the due records cannot be fetched.
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let report = run_batch(
            self.store.as_ref(),
            self.repository.as_ref(),
            self.flow.as_ref(),
            &self.policy,
            self.batch_size,
        )
        .await?;

        self.stats.write().await.absorb(&report);
        Ok(report)
    }

    /// Snapshot of the cumulative stats.
    pub async fn stats(&self) -> ProcessorStats {
        *self.stats.read().await
    }

    /// Maximum records fetched per pass.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
