use super::{
    outcome::{BatchResult, Outcome},
    request::{BulkBatch, BulkRequest, build_requests},
};
use crate::server::{metrics::Metrics, pool::manager::BulkProcessor, store::SharedStore};
use accountd_core::{
    Result,
    types::{OperationKind, User},
};
use core::time::Duration;
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-item bookkeeping while a batch is in flight.
enum OutcomeSlot {
    /// Still waiting; holds the submitted user in case the item never
    /// reports.
    Pending(User),
    Settled,
}

/// Drives whole batches through a [`BulkProcessor`].
#[derive(Clone)]
pub struct BulkCoordinator {
    store: SharedStore,
    metrics: Metrics,
    deadline: Option<Duration>,
    shutdown: CancellationToken,
}

impl BulkCoordinator {
    pub fn new(store: SharedStore, metrics: Metrics) -> Self {
        Self {
            store,
            metrics,
            deadline: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abandons a batch after `deadline`; unfinished items are reported as
    /// timed out.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Every batch token is a child of `shutdown`, so cancelling it cancels
    /// all in-flight batches.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Applies `kind` to every user with at most `concurrency_limit`
    /// operations in flight, and returns one outcome per user.
    ///
    /// Outcomes are listed in completion order. Items still running when the
    /// deadline passes are listed last, as timed out.
    ///
    /// # Errors
    ///
    /// Fails only if the processor cannot be constructed (a zero
    /// `concurrency_limit`). Item failures are reported in the result.
    #[tracing::instrument(skip_all, fields(operation = %kind, count = users.len()))]
    pub async fn run_batch(
        &self,
        users: Vec<User>,
        kind: OperationKind,
        concurrency_limit: usize,
    ) -> Result<BatchResult> {
        let start = Instant::now();
        let processor = BulkProcessor::new(concurrency_limit, self.metrics.clone())?;
        let cancel = self.shutdown.child_token();
        tracing::debug!(
            concurrency_limit = processor.concurrency_limit(),
            deadline = ?self.deadline,
            "Bulk processor started"
        );

        let total = users.len();
        let BulkBatch { requests, pending } = build_requests(users, kind, &self.store, &cancel);

        let mut slots = Vec::with_capacity(total);
        let mut arrivals = FuturesUnordered::new();
        for cell in pending {
            slots.push(OutcomeSlot::Pending(cell.user));
            let (index, rx) = (cell.index, cell.rx);
            arrivals.push(async move { (index, rx.await) });
        }

        let feed = feed_requests(&processor, requests);
        tokio::pin!(feed);
        let mut feeding = true;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut result = BatchResult::new(kind, total);
        while result.outcomes.len() < total {
            tokio::select! {
                () = &mut feed, if feeding => feeding = false,
                Some((index, received)) = arrivals.next() => {
                    let slot = std::mem::replace(&mut slots[index], OutcomeSlot::Settled);
                    if let OutcomeSlot::Pending(user) = slot {
                        let outcome = received.unwrap_or_else(|_| Outcome::worker_lost(user));
                        settle(&mut result, index, outcome);
                    }
                }
                () = &mut deadline => {
                    tracing::warn!(
                        settled = result.outcomes.len(),
                        total,
                        "Bulk deadline passed, abandoning remaining items"
                    );
                    cancel.cancel();
                    for (index, slot) in slots.iter_mut().enumerate() {
                        if let OutcomeSlot::Pending(user) =
                            std::mem::replace(slot, OutcomeSlot::Settled)
                        {
                            settle(&mut result, index, Outcome::deadline_exceeded(user));
                        }
                    }
                }
                else => break,
            }
        }

        processor.stop();

        self.metrics
            .record_batch(kind, total, start.elapsed(), result.status);
        tracing::info!(
            status = %result.status,
            failed = result.failed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Bulk batch finished"
        );

        Ok(result)
    }
}

fn settle(result: &mut BatchResult, index: usize, outcome: Outcome) {
    if !outcome.status.is_success() {
        tracing::warn!(
            index,
            status = %outcome.status,
            reason = %outcome.error_reason,
            message = %outcome.error_message,
            "Bulk item failed"
        );
    }
    result.record(outcome);
}

/// Pushes requests into the processor in input order, waiting whenever its
/// inbound buffer is full.
///
/// Stops at the first refused submission. The refused request, and every
/// one after it, is dropped, which closes their outcome cells.
async fn feed_requests(processor: &BulkProcessor, requests: Vec<BulkRequest>) {
    for request in requests {
        if let Err(e) = processor.submit(request).await {
            tracing::warn!("Failed to submit bulk item: {e}");
            return;
        }
    }
}
