//! Reliable processing of provider callbacks.
//!
//! Failed callbacks are persisted in a retry store, replayed on an
//! exponential schedule and either succeed or are dead-lettered after a
//! bounded number of attempts. Delivery is at-least-once: the callback flow
//! may see the same callback more than once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod classify;
pub mod error;
pub mod ingress;
pub mod processor;
pub mod store;
pub mod worker;

pub use backoff::{backoff_delay, compute_next_retry_at, next_retry_at, RetryPolicy};
pub use classify::{classify, FailureClass};
pub use error::{Result, RetryError};
pub use ingress::{CallbackAccepted, CallbackIngress, CallbackRequest};
pub use processor::{process_due_retries, BatchReport, ProcessorStats, RetryProcessor};
pub use store::{memory::InMemoryRetryStore, PostgresRetryStore, RetryStore};
pub use worker::RetryWorker;
