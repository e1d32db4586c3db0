//! Test infrastructure for deterministic retry testing.
//!
//! [`TestEnv`] wires an in-memory retry store, shipment repository and
//! scripted callback flow to a shared [`TestClock`], so tests can enqueue,
//! move time and replay without a database.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use parcelhook_core::{Shipment, TestClock};
use parcelhook_retry::{
    process_due_retries, CallbackIngress, InMemoryRetryStore, RetryPolicy, RetryProcessor,
};

pub mod doubles;
pub mod fixtures;

pub use doubles::{InMemoryShipmentRepository, ReceivedCallback, ScriptedFlow};
pub use fixtures::{
    callback_payload, failed_callback, token_headers, ShipmentBuilder, TEST_PROVIDER,
};

/// Collaborators for one test, sharing a virtual clock.
pub struct TestEnv {
    /// Virtual time source.
    pub clock: TestClock,
    /// Retry queue.
    pub retry_store: Arc<InMemoryRetryStore>,
    /// Shipment repository.
    pub shipments: Arc<InMemoryShipmentRepository>,
    /// Callback flow.
    pub flow: Arc<ScriptedFlow>,
    /// Retry policy.
    pub policy: RetryPolicy,
}

impl TestEnv {
    /// Creates an environment with the default policy.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    /// Creates an environment with `policy`.
    pub fn with_policy(policy: RetryPolicy) -> Self {
        let clock = TestClock::new();
        let retry_store =
            Arc::new(InMemoryRetryStore::with_clock(policy.backoff_seconds, Arc::new(clock.clone())));

        Self {
            clock,
            retry_store,
            shipments: Arc::new(InMemoryShipmentRepository::new()),
            flow: Arc::new(ScriptedFlow::new()),
            policy,
        }
    }

    /// Stores `shipment` and returns it.
    pub async fn add_shipment(&self, shipment: Shipment) -> Shipment {
        self.shipments.insert(shipment.clone()).await;
        shipment
    }

    /// Ingress wired to this environment's collaborators.
    pub fn ingress(&self) -> CallbackIngress {
        CallbackIngress::new(self.shipments.clone(), self.flow.clone(), self.policy)
            .with_retry_store(self.retry_store.clone())
    }

    /// Processor wired to this environment's collaborators.
    pub fn processor(&self, batch_size: usize) -> RetryProcessor {
        RetryProcessor::new(
            self.retry_store.clone(),
            self.shipments.clone(),
            self.flow.clone(),
            self.policy,
            batch_size,
        )
    }

    /// Runs one processing pass.
    ///
    /// # Panics
    ///
    /// Panics if the due records cannot be fetched.
    pub async fn process_due(&self, limit: usize) -> usize {
        process_due_retries(
            self.retry_store.as_ref(),
            self.shipments.as_ref(),
            self.flow.as_ref(),
            &self.policy,
            limit,
        )
        .await
        .expect("fetching due retries failed")
    }

    /// Advances virtual time.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Advances virtual time past every deadline `attempt` can produce.
    pub fn advance_past_attempt(&self, attempt: u32) {
        let delay = parcelhook_retry::backoff_delay(attempt, self.policy.backoff_seconds);
        self.clock.advance(delay + Duration::from_secs(1));
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
