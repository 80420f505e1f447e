//! Bounded-concurrency executor for bulk requests.
//!
//! A [`BulkProcessor`] is created per batch. It owns a bounded inbound
//! channel, a [`Semaphore`] with one permit per concurrency slot, and a
//! single dispatch task. The dispatch task takes one request at a time,
//! waits for a free slot, and hands the request to a freshly spawned worker
//! without waiting for it to finish.
//!
//! Backpressure comes from two places: the dispatch loop stalls while every
//! slot is taken, and once the inbound buffer (sized to the concurrency
//! limit) is full, [`BulkProcessor::submit`] waits too.

use super::worker::run_worker;
use crate::server::{bulk::request::BulkRequest, metrics::Metrics};
use accountd_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

pub struct BulkProcessor {
    inbound: mpsc::Sender<BulkRequest>,
    stop: CancellationToken,
    concurrency_limit: usize,
}

impl BulkProcessor {
    /// Starts a processor that runs at most `concurrency_limit` requests at
    /// once.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConcurrencyLimit`] if `concurrency_limit` is
    /// zero.
    pub fn new(concurrency_limit: usize, metrics: Metrics) -> Result<Self> {
        if concurrency_limit == 0 {
            return Err(Error::InvalidConcurrencyLimit {
                limit: concurrency_limit,
            });
        }

        let (inbound, rx) = mpsc::channel(concurrency_limit);
        let slots = Arc::new(Semaphore::new(concurrency_limit));
        let stop = CancellationToken::new();

        tokio::spawn(dispatch_loop(rx, slots, stop.clone(), metrics));

        Ok(Self {
            inbound,
            stop,
            concurrency_limit,
        })
    }

    pub const fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Queues a request for execution, waiting while the inbound buffer is
    /// full.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if [`Self::stop`] was already called.
    /// - [`Error::ChannelError`] if the dispatch loop has exited.
    pub async fn submit(&self, request: BulkRequest) -> Result<()> {
        if self.stop.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        self.inbound
            .send(request)
            .await
            .map_err(|e| Error::ChannelError {
                context: format!("Bulk dispatch loop closed (item {})", e.0.index),
            })
    }

    /// Stops intake. Requests still queued are dropped; workers that were
    /// already dispatched run to completion.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for BulkProcessor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Single dispatch task of a [`BulkProcessor`].
///
/// Exits when the stop token fires or every sender is gone. A request that
/// was dequeued but is still waiting for a slot when the processor stops is
/// dropped; its outcome cell closes and the coordinator reports it as lost.
async fn dispatch_loop(
    mut rx: mpsc::Receiver<BulkRequest>,
    slots: Arc<Semaphore>,
    stop: CancellationToken,
    metrics: Metrics,
) {
    tracing::trace!("Bulk dispatch loop started");

    loop {
        let request = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            () = stop.cancelled() => {
                tracing::debug!(index = request.index, "Processor stopped while item waited for a slot");
                break;
            }
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_closed) => break,
            },
        };

        tokio::spawn(run_worker(request, permit, metrics.clone()));
    }

    tracing::trace!(abandoned = rx.len(), "Bulk dispatch loop stopped");
}
