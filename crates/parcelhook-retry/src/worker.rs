//! Polling loop that drives the retry processor.

use std::{sync::Arc, time::Duration};

use parcelhook_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::processor::RetryProcessor;

/// Pause after a failed pass.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Runs [`RetryProcessor::process_batch`] until cancelled.
///
/// A pass that processed nothing is followed by `poll_interval` of sleep;
/// otherwise the next pass starts immediately so backlogs drain.
pub struct RetryWorker {
    processor: Arc<RetryProcessor>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl RetryWorker {
    /// Creates a worker around `processor`.
    pub fn new(
        processor: Arc<RetryProcessor>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        Self { processor, clock, poll_interval }
    }

    /// Main loop. Returns once `cancellation_token` fires.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            batch_size = self.processor.batch_size(),
            "retry worker starting"
        );

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            match self.processor.process_batch().await {
                Ok(report) => {
                    if report.processed == 0 {
                        tokio::select! {
                            () = self.clock.sleep(self.poll_interval) => {},
                            () = cancellation_token.cancelled() => break,
                        }
                    }
                },
                Err(e) => {
                    error!(error = %e, "retry batch failed");
                    tokio::select! {
                        () = self.clock.sleep(ERROR_BACKOFF) => {},
                        () = cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!("retry worker stopped");
    }
}
