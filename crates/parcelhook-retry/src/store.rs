//! Durable storage contract for the retry queue.
//!
//! Ingress and the processor depend only on [`RetryStore`]. Production uses
//! [`PostgresRetryStore`] over the `callback_retries` table; tests and
//! database-less deployments use [`memory::InMemoryRetryStore`].

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parcelhook_core::{
    error::Result,
    models::{FailedCallback, RetryId, RetryRecord, RetryStatus},
    storage::callback_retries,
    Clock, RealClock,
};
use tracing::debug;

use crate::backoff::next_retry_at;

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage operations for failed callbacks.
///
/// `mark_*` transitions apply only to pending records; calling them on a
/// missing or terminal record is a no-op. Every transition is durable when
/// the returned future resolves.
pub trait RetryStore: Send + Sync + 'static {
    /// Enqueues a failed callback as a pending record with `attempts = 0`,
    /// due after the first backoff interval.
    fn store_failed_callback(&self, callback: FailedCallback) -> StoreFuture<'_, RetryId>;

    /// Returns up to `limit` pending records whose deadline has elapsed,
    /// earliest deadline first.
    fn get_due_retries(&self, limit: usize) -> StoreFuture<'_, Vec<RetryRecord>>;

    /// Moves the record to `succeeded`.
    fn mark_succeeded(&self, id: RetryId) -> StoreFuture<'_, ()>;

    /// Increments `attempts`, stores `error` and reschedules using the new
    /// `attempts` value as the attempt number.
    fn mark_failed(&self, id: RetryId, error: String) -> StoreFuture<'_, ()>;

    /// Moves the record to `exhausted`.
    fn mark_exhausted(&self, id: RetryId) -> StoreFuture<'_, ()>;

    /// Loads a record regardless of status.
    fn find_by_id(&self, id: RetryId) -> StoreFuture<'_, Option<RetryRecord>>;
}

fn new_record(callback: FailedCallback, now: DateTime<Utc>, backoff: u64) -> RetryRecord {
    RetryRecord {
        id: RetryId::new(),
        shipment_id: callback.shipment_id,
        provider_slug: callback.provider_slug,
        payload: callback.payload,
        headers: callback.headers,
        attempts: 0,
        next_retry_at: Some(next_retry_at(now, 1, backoff)),
        last_error: callback.reason,
        status: RetryStatus::Pending,
        created_at: now,
    }
}

/// Retry store backed by the Postgres `callback_retries` table.
pub struct PostgresRetryStore {
    repository: Arc<callback_retries::Repository>,
    backoff_seconds: u64,
    clock: Arc<dyn Clock>,
    claim_lease: Option<Duration>,
}

impl PostgresRetryStore {
    /// Creates a store using the wall clock.
    pub fn new(repository: Arc<callback_retries::Repository>, backoff_seconds: u64) -> Self {
        Self { repository, backoff_seconds, clock: Arc::new(RealClock::new()), claim_lease: None }
    }

    /// Replaces the clock used for deadlines.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Claims due records with `FOR UPDATE SKIP LOCKED`, hiding them from
    /// other processors for `lease`.
    #[must_use]
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = Some(lease);
        self
    }
}

impl RetryStore for PostgresRetryStore {
    fn store_failed_callback(&self, callback: FailedCallback) -> StoreFuture<'_, RetryId> {
        Box::pin(async move {
            let record = new_record(callback, self.clock.now(), self.backoff_seconds);
            let id = self.repository.create(&record).await?;
            debug!(retry_id = %id, next_retry_at = ?record.next_retry_at, "stored failed callback");
            Ok(id)
        })
    }

    fn get_due_retries(&self, limit: usize) -> StoreFuture<'_, Vec<RetryRecord>> {
        Box::pin(async move {
            let now = self.clock.now();
            match self.claim_lease {
                Some(lease) => {
                    let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
                    let until = now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC);
                    self.repository.claim_due(now, limit, until).await
                },
                None => self.repository.find_due(now, limit).await,
            }
        })
    }

    fn mark_succeeded(&self, id: RetryId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if !self.repository.mark_succeeded(id).await? {
                debug!(retry_id = %id, "mark_succeeded skipped, record not pending");
            }
            Ok(())
        })
    }

    fn mark_failed(&self, id: RetryId, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let now = self.clock.now();
            let backoff = self.backoff_seconds;
            let attempts = self
                .repository
                .mark_failed(id, &error, |attempts| next_retry_at(now, attempts, backoff))
                .await?;
            if attempts.is_none() {
                debug!(retry_id = %id, "mark_failed skipped, record not pending");
            }
            Ok(())
        })
    }

    fn mark_exhausted(&self, id: RetryId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if !self.repository.mark_exhausted(id).await? {
                debug!(retry_id = %id, "mark_exhausted skipped, record not pending");
            }
            Ok(())
        })
    }

    fn find_by_id(&self, id: RetryId) -> StoreFuture<'_, Option<RetryRecord>> {
        Box::pin(async move { self.repository.find_by_id(id).await })
    }
}

pub mod memory {
    //! In-memory retry store.
    //!
    //! Honors the same contract as the Postgres store. Supports forcing
    //! deadlines and injecting storage failures for tests.

    use std::{collections::HashMap, sync::Arc};

    use chrono::{DateTime, Utc};
    use parcelhook_core::{
        error::CoreError,
        models::{FailedCallback, RetryId, RetryRecord, RetryStatus},
        Clock, RealClock,
    };
    use tokio::sync::RwLock;

    use super::{new_record, RetryStore, StoreFuture};
    use crate::backoff::next_retry_at;

    /// In-memory retry store keyed by record ID.
    pub struct InMemoryRetryStore {
        records: Arc<RwLock<HashMap<RetryId, RetryRecord>>>,
        clock: Arc<dyn Clock>,
        backoff_seconds: u64,
        enqueue_error: Arc<RwLock<Option<String>>>,
        due_error: Arc<RwLock<Option<String>>>,
        mark_error: Arc<RwLock<Option<String>>>,
    }

    impl InMemoryRetryStore {
        /// Creates an empty store using the wall clock.
        pub fn new(backoff_seconds: u64) -> Self {
            Self::with_clock(backoff_seconds, Arc::new(RealClock::new()))
        }

        /// Creates an empty store reading time from `clock`.
        pub fn with_clock(backoff_seconds: u64, clock: Arc<dyn Clock>) -> Self {
            Self {
                records: Arc::new(RwLock::new(HashMap::new())),
                clock,
                backoff_seconds,
                enqueue_error: Arc::new(RwLock::new(None)),
                due_error: Arc::new(RwLock::new(None)),
                mark_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Overrides a record's deadline.
        pub async fn set_next_retry_at(&self, id: RetryId, at: DateTime<Utc>) {
            if let Some(record) = self.records.write().await.get_mut(&id) {
                record.next_retry_at = Some(at);
            }
        }

        /// Makes a record due one second before the current clock reading.
        pub async fn force_due(&self, id: RetryId) {
            let at = self.clock.now() - chrono::Duration::seconds(1);
            self.set_next_retry_at(id, at).await;
        }

        /// Inserts a record as-is.
        pub async fn insert(&self, record: RetryRecord) {
            self.records.write().await.insert(record.id, record);
        }

        /// Fails the next `store_failed_callback` call.
        pub async fn inject_enqueue_error(&self, error: impl Into<String>) {
            *self.enqueue_error.write().await = Some(error.into());
        }

        /// Fails the next `get_due_retries` call.
        pub async fn inject_due_error(&self, error: impl Into<String>) {
            *self.due_error.write().await = Some(error.into());
        }

        /// Fails the next `mark_*` call.
        pub async fn inject_mark_error(&self, error: impl Into<String>) {
            *self.mark_error.write().await = Some(error.into());
        }

        /// Returns all records, oldest first.
        pub async fn records(&self) -> Vec<RetryRecord> {
            let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
            records.sort_by_key(|r| r.created_at);
            records
        }

        /// Number of stored records.
        pub async fn len(&self) -> usize {
            self.records.read().await.len()
        }

        /// Returns true when nothing has been enqueued.
        pub async fn is_empty(&self) -> bool {
            self.records.read().await.is_empty()
        }

        /// Checks a record's status.
        pub async fn verify_status(&self, id: RetryId, expected: RetryStatus) -> bool {
            self.records.read().await.get(&id).is_some_and(|r| r.status == expected)
        }

        async fn take_error(slot: &RwLock<Option<String>>) -> Result<(), CoreError> {
            match slot.write().await.take() {
                Some(error) => Err(CoreError::Database(error)),
                None => Ok(()),
            }
        }

        async fn transition<F>(&self, id: RetryId, apply: F) -> Result<(), CoreError>
        where
            F: FnOnce(&mut RetryRecord) + Send,
        {
            Self::take_error(&self.mark_error).await?;
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(&id).filter(|r| r.status == RetryStatus::Pending) {
                apply(record);
            }
            Ok(())
        }
    }

    impl RetryStore for InMemoryRetryStore {
        fn store_failed_callback(&self, callback: FailedCallback) -> StoreFuture<'_, RetryId> {
            Box::pin(async move {
                Self::take_error(&self.enqueue_error).await?;
                let record = new_record(callback, self.clock.now(), self.backoff_seconds);
                let id = record.id;
                self.records.write().await.insert(id, record);
                Ok(id)
            })
        }

        fn get_due_retries(&self, limit: usize) -> StoreFuture<'_, Vec<RetryRecord>> {
            Box::pin(async move {
                Self::take_error(&self.due_error).await?;
                let now = self.clock.now();
                let mut due: Vec<RetryRecord> =
                    self.records.read().await.values().filter(|r| r.is_due(now)).cloned().collect();
                due.sort_by_key(|r| r.next_retry_at);
                due.truncate(limit);
                Ok(due)
            })
        }

        fn mark_succeeded(&self, id: RetryId) -> StoreFuture<'_, ()> {
            Box::pin(self.transition(id, |record| {
                record.status = RetryStatus::Succeeded;
                record.next_retry_at = None;
            }))
        }

        fn mark_failed(&self, id: RetryId, error: String) -> StoreFuture<'_, ()> {
            let now = self.clock.now();
            let backoff = self.backoff_seconds;
            Box::pin(self.transition(id, move |record| {
                record.attempts = record.attempts.saturating_add(1);
                record.last_error = Some(error);
                record.next_retry_at = Some(next_retry_at(now, record.attempt_count(), backoff));
            }))
        }

        fn mark_exhausted(&self, id: RetryId) -> StoreFuture<'_, ()> {
            Box::pin(self.transition(id, |record| {
                record.status = RetryStatus::Exhausted;
                record.next_retry_at = None;
            }))
        }

        fn find_by_id(&self, id: RetryId) -> StoreFuture<'_, Option<RetryRecord>> {
            Box::pin(async move { Ok(self.records.read().await.get(&id).cloned()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parcelhook_core::{ShipmentId, TestClock};
    use serde_json::json;

    use super::{memory::InMemoryRetryStore, *};

    fn callback(shipment: &str) -> FailedCallback {
        FailedCallback {
            shipment_id: ShipmentId::new(shipment),
            provider_slug: "dummy".to_string(),
            payload: json!({"event": "delivered"}),
            headers: HashMap::from([("x-callback-token".to_string(), "secret".to_string())]),
            reason: Some("connection reset".to_string()),
        }
    }

    #[tokio::test]
    async fn enqueued_record_starts_pending_with_reason() {
        let clock = TestClock::new();
        let store = InMemoryRetryStore::with_clock(60, Arc::new(clock.clone()));

        let id = store.store_failed_callback(callback("s-1")).await.unwrap();
        let record = store.find_by_id(id).await.unwrap().unwrap();

        assert_eq!(record.attempts, 0);
        assert_eq!(record.status, RetryStatus::Pending);
        assert_eq!(record.last_error.as_deref(), Some("connection reset"));
        assert_eq!(record.next_retry_at, Some(clock.now() + chrono::Duration::seconds(60)));
        assert_eq!(record.headers.get("x-callback-token").map(String::as_str), Some("secret"));
    }

    #[tokio::test]
    async fn transitions_ignore_terminal_records() {
        let store = InMemoryRetryStore::new(60);
        let id = store.store_failed_callback(callback("s-1")).await.unwrap();

        store.mark_exhausted(id).await.unwrap();
        store.mark_failed(id, "late failure".to_string()).await.unwrap();
        store.mark_succeeded(id).await.unwrap();

        let record = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.status, RetryStatus::Exhausted);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.next_retry_at, None);
    }

    #[tokio::test]
    async fn marks_on_missing_records_are_no_ops() {
        let store = InMemoryRetryStore::new(60);
        let id = RetryId::new();

        store.mark_succeeded(id).await.unwrap();
        store.mark_failed(id, "boom".to_string()).await.unwrap();
        store.mark_exhausted(id).await.unwrap();

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn injected_errors_fire_once() {
        let store = InMemoryRetryStore::new(60);
        store.inject_due_error("connection refused").await;

        assert!(store.get_due_retries(10).await.is_err());
        assert!(store.get_due_retries(10).await.unwrap().is_empty());
    }
}
