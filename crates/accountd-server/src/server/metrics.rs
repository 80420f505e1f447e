//! Metric instruments for the service and the bulk core.
//!
//! [`Metrics`] is built once at startup from the OpenTelemetry meter provider
//! (see [`crate::server::telemetry`]) and handed to every component that
//! records something. Nothing is registered globally; two services in one
//! process can carry two independent handles.
//!
//! Without the `metrics` feature the handle is empty and every method
//! compiles to a no-op.

use accountd_core::types::{OperationKind, StatusCode};
use core::time::Duration;

#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
};
#[cfg(feature = "metrics")]
use std::sync::Arc;

#[cfg(feature = "metrics")]
struct Instruments {
    requests: Counter<u64>,
    batches: Counter<u64>,
    items: Counter<u64>,
    workers_inflight: UpDownCounter<i64>,
    batch_duration_ms: Histogram<f64>,
    batch_size: Histogram<u64>,
}

/// Shared, cheaply clonable set of instruments.
#[derive(Clone, Default)]
pub struct Metrics {
    #[cfg(feature = "metrics")]
    instruments: Option<Arc<Instruments>>,
}

impl Metrics {
    /// A handle that records nothing.
    #[cfg(any(test, not(feature = "metrics")))]
    pub fn disabled() -> Self {
        Self::default()
    }
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        let instruments = Instruments {
            requests: meter
                .u64_counter("requests")
                .with_description("Total gRPC requests by method")
                .build(),
            batches: meter
                .u64_counter("bulk_batches")
                .with_description("Bulk batches completed by operation and overall status")
                .build(),
            items: meter
                .u64_counter("bulk_items")
                .with_description("Bulk items completed by operation and item status")
                .build(),
            workers_inflight: meter
                .i64_up_down_counter("bulk_workers_inflight")
                .with_description("Bulk workers currently running a store operation")
                .build(),
            batch_duration_ms: meter
                .f64_histogram("bulk_batch_duration")
                .with_unit("ms")
                .with_description("End-to-end bulk batch duration")
                .build(),
            batch_size: meter
                .u64_histogram("bulk_batch_size")
                .with_description("Users per bulk batch")
                .build(),
        };

        Self {
            instruments: Some(Arc::new(instruments)),
        }
    }

    pub fn increment_requests(&self, method: &'static str) {
        if let Some(m) = &self.instruments {
            m.requests.add(1, &[KeyValue::new("method", method)]);
        }
    }

    pub fn record_item(&self, kind: OperationKind, status: StatusCode) {
        if let Some(m) = &self.instruments {
            m.items.add(
                1,
                &[
                    KeyValue::new("operation", kind.as_str()),
                    KeyValue::new("status", status.as_str()),
                ],
            );
        }
    }

    pub fn record_batch(
        &self,
        kind: OperationKind,
        size: usize,
        duration: Duration,
        status: StatusCode,
    ) {
        if let Some(m) = &self.instruments {
            let attrs = [
                KeyValue::new("operation", kind.as_str()),
                KeyValue::new("status", status.as_str()),
            ];
            m.batches.add(1, &attrs);
            m.batch_size.record(size as u64, &attrs[..1]);
            m.batch_duration_ms
                .record(duration.as_secs_f64() * 1_000.0, &attrs[..1]);
        }
    }

    /// Counts a worker as in flight until the returned guard drops.
    pub fn track_worker(&self) -> WorkerGuard {
        let counter = self.instruments.as_ref().map(|m| {
            m.workers_inflight.add(1, &[]);
            m.workers_inflight.clone()
        });
        WorkerGuard { counter }
    }
}

#[cfg(not(feature = "metrics"))]
impl Metrics {
    pub fn increment_requests(&self, _method: &'static str) {}

    pub fn record_item(&self, _kind: OperationKind, _status: StatusCode) {}

    pub fn record_batch(
        &self,
        _kind: OperationKind,
        _size: usize,
        _duration: Duration,
        _status: StatusCode,
    ) {
    }

    pub fn track_worker(&self) -> WorkerGuard {
        WorkerGuard {}
    }
}

/// Decrements the in-flight worker count on drop, including on unwind.
#[must_use]
pub struct WorkerGuard {
    #[cfg(feature = "metrics")]
    counter: Option<UpDownCounter<i64>>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(counter) = &self.counter {
                counter.add(-1, &[]);
            }
        }
    }
}
