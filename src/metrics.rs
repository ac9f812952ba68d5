//! Prometheus metrics, grounded in `transactional-outbox/src/metrics.rs`'s
//! `OutboxMetrics` (one `Opts::new(...).const_label("service", ...)` per
//! gauge/counter, best-effort registration) and extended with the relay's
//! error/worker gauges and the inbox side the teacher's library never had.

use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

fn register(service: &str, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::with_opts(Opts::new(name, help).const_label("service", service))
        .unwrap_or_else(|_| panic!("valid metric opts for {name}"));
    if let Err(e) = prometheus::default_registry().register(Box::new(gauge.clone())) {
        warn!("failed to register metric {}: {}", name, e);
    }
    gauge
}

fn register_counter(service: &str, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help).const_label("service", service))
        .unwrap_or_else(|_| panic!("valid metric opts for {name}"));
    if let Err(e) = prometheus::default_registry().register(Box::new(counter.clone())) {
        warn!("failed to register metric {}: {}", name, e);
    }
    counter
}

/// Metrics for the outbox relay.
#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub published: IntCounter,
    pub publish_errors: IntCounter,
    pub workers_active: IntGauge,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> Self {
        Self {
            pending: register(service, "outbox_pending_count", "Unpublished outbox rows currently pending"),
            oldest_pending_age_seconds: register(
                service,
                "outbox_oldest_pending_age_seconds",
                "Age in seconds of the oldest pending outbox row",
            ),
            published: register_counter(
                service,
                "outbox_published_total",
                "Total outbox rows marked delivered",
            ),
            publish_errors: register_counter(
                service,
                "outbox_publish_errors_total",
                "Total broker publish failures observed by relay workers",
            ),
            workers_active: register(service, "outbox_worker_active", "Number of live relay workers"),
        }
    }
}

/// Metrics for the inbox consumer and batch processor.
#[derive(Clone)]
pub struct InboxMetrics {
    pub buffer_size: IntGauge,
    pub flush_total: IntCounter,
    pub processed_total: IntCounter,
    pub failed_total: IntCounter,
    pub batch_errors_total: IntCounter,
}

impl InboxMetrics {
    pub fn new(service: &str) -> Self {
        Self {
            buffer_size: register(service, "inbox_buffer_size", "Current in-memory inbox buffer size"),
            flush_total: register_counter(
                service,
                "inbox_flush_total",
                "Total buffer flushes sent to the batch channel",
            ),
            processed_total: register_counter(
                service,
                "inbox_processed_total",
                "Total inbox rows that reached status=processed",
            ),
            failed_total: register_counter(
                service,
                "inbox_failed_total",
                "Total inbox rows that reached status=failed",
            ),
            batch_errors_total: register_counter(
                service,
                "inbox_batch_errors_total",
                "Total batches aborted by a parse or database error",
            ),
        }
    }
}
