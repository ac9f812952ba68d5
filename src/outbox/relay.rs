//! Outbox relay: a worker pool that claims, publishes, and marks outbox rows
//! delivered. Grounded in `transactional-outbox/src/lib.rs`'s
//! `OutboxProcessor` for its shape (poll loop, shared repository/publisher,
//! optional metrics) but *not* its retry bookkeeping: the teacher tracks
//! `retry_count`/`last_error` per row and applies exponential backoff before
//! a retry, which assumes a richer row schema than spec's outbox table has.
//! Here a failed publish simply rolls back the claiming transaction and the
//! row is re-claimed on the relay's own next poll cycle — no per-row retry
//! state, no backoff, no max-retries cutoff.
//!
//! `SKIP LOCKED` claiming itself is grounded in `mqk-db/src/lib.rs`'s
//! `outbox_claim_batch` (see `crate::store`), since the teacher's own
//! repository does not do row locking at all.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerProducer, OutboundMessage};
use crate::config::RelayConfig;
use crate::error::MessagingResult;
use crate::metrics::OutboxMetrics;
use crate::model::OutboxRow;
use crate::store::StoreAdapter;

/// Handle returned by [`OutboxRelay::start`]; dropping it does not stop the
/// workers — call [`OutboxRelay::stop`] for a clean shutdown.
pub struct RelayHandle {
    shutdown: broadcast::Sender<()>,
    joins: Vec<JoinHandle<()>>,
}

/// Worker pool implementing spec §4.3's claim → publish → mark → commit →
/// sleep loop.
pub struct OutboxRelay<S: StoreAdapter, P: BrokerProducer> {
    store: Arc<S>,
    producer: Arc<P>,
    config: RelayConfig,
    metrics: Option<OutboxMetrics>,
    handle: Mutex<Option<RelayHandle>>,
}

impl<S, P> OutboxRelay<S, P>
where
    S: StoreAdapter + 'static,
    P: BrokerProducer + 'static,
{
    pub fn new(store: Arc<S>, producer: Arc<P>, config: RelayConfig) -> Self {
        Self {
            store,
            producer,
            config,
            metrics: None,
            handle: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn `config.worker_count` independent workers. Calling `start`
    /// while already started replaces the previous handle without stopping
    /// the old workers — callers should `stop` before calling `start` again.
    pub async fn start(&self) {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut joins = Vec::with_capacity(self.config.worker_count);

        for worker_id in 0..self.config.worker_count {
            let store = Arc::clone(&self.store);
            let producer = Arc::clone(&self.producer);
            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let shutdown_rx = shutdown_tx.subscribe();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, store, producer, config, metrics, shutdown_rx).await;
            }));
        }

        if let Some(metrics) = &self.metrics {
            metrics.workers_active.set(self.config.worker_count as i64);
        }

        info!(worker_count = self.config.worker_count, "outbox relay started");
        *self.handle.lock().await = Some(RelayHandle {
            shutdown: shutdown_tx,
            joins,
        });
    }

    /// Broadcast shutdown and wait for every worker to finish its current
    /// transaction and exit, up to `config.shutdown_grace`. Workers still
    /// running past the grace period are left detached rather than aborted,
    /// since aborting mid-transaction would leave the row lock to be
    /// released only when the connection itself closes.
    pub async fn stop(&self) {
        let Some(RelayHandle { shutdown, joins }) = self.handle.lock().await.take() else {
            return;
        };

        let _ = shutdown.send(());

        let grace = self.config.shutdown_grace;
        for join in joins {
            if timeout(grace, join).await.is_err() {
                warn!("relay worker did not exit within shutdown grace period");
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.workers_active.set(0);
        }

        info!("outbox relay stopped");
    }
}

async fn worker_loop<S, P>(
    worker_id: usize,
    store: Arc<S>,
    producer: Arc<P>,
    config: RelayConfig,
    metrics: Option<OutboxMetrics>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: StoreAdapter,
    P: BrokerProducer,
{
    debug!(worker_id, "relay worker starting");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!(worker_id, "relay worker received shutdown signal");
                break;
            }
            result = poll_once(&store, &producer, &config, &metrics) => {
                match result {
                    Ok(0) => {}
                    Ok(n) => info!(worker_id, delivered = n, "relay worker delivered batch"),
                    Err(e) => error!(worker_id, error = %e, "relay worker poll cycle failed"),
                }
            }
        }

        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!(worker_id, "relay worker received shutdown signal during sleep");
                break;
            }
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }

    debug!(worker_id, "relay worker exited");
}

/// One claim → publish → mark → commit cycle. Returns the number of rows
/// delivered (0 when there was nothing pending).
async fn poll_once<S, P>(
    store: &Arc<S>,
    producer: &Arc<P>,
    config: &RelayConfig,
    metrics: &Option<OutboxMetrics>,
) -> MessagingResult<usize>
where
    S: StoreAdapter,
    P: BrokerProducer,
{
    let mut tx = store.begin().await?;

    let claimed: Vec<OutboxRow> = store.claim_pending_outbox(&mut tx, config.batch_size).await?;
    if claimed.is_empty() {
        tx.rollback().await.map_err(crate::error::StoreError::from)?;
        return Ok(0);
    }

    let messages: Vec<OutboundMessage> = claimed
        .iter()
        .map(|row| OutboundMessage {
            topic: row.topic.clone(),
            key: row.key.clone(),
            payload: serde_json::to_vec(&row.payload).unwrap_or_default(),
        })
        .collect();

    if let Err(e) = producer.publish_batch(&messages).await {
        tx.rollback().await.map_err(crate::error::StoreError::from)?;
        if let Some(metrics) = metrics {
            metrics.publish_errors.inc();
        }
        return Err(e);
    }

    let ids: Vec<uuid::Uuid> = claimed.iter().map(|row| row.id).collect();
    store.mark_outbox_delivered(&mut tx, &ids, Utc::now()).await?;
    tx.commit().await.map_err(crate::error::StoreError::from)?;

    if let Some(metrics) = metrics {
        metrics.published.inc_by(claimed.len() as u64);
        if let Ok((pending, age)) = store.pending_stats().await {
            metrics.pending.set(pending);
            metrics.oldest_pending_age_seconds.set(age);
        }
    }

    Ok(claimed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OutboundMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProducer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BrokerProducer for CountingProducer {
        async fn publish_batch(&self, _messages: &[OutboundMessage]) -> MessagingResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn relay_config_worker_count_drives_spawned_worker_count() {
        // A unit-level sanity check on the config plumbing; the worker loop
        // itself needs a live database to exercise end-to-end.
        let config = RelayConfig {
            worker_count: 4,
            ..RelayConfig::default()
        };
        assert_eq!(config.worker_count, 4);
    }

    #[tokio::test]
    async fn counting_producer_increments_once_per_batch() {
        let producer = CountingProducer { calls: AtomicUsize::new(0) };
        let messages = vec![OutboundMessage {
            topic: "t".into(),
            key: "k".into(),
            payload: b"{}".to_vec(),
        }];
        producer.publish_batch(&messages).await.unwrap();
        producer.publish_batch(&messages).await.unwrap();
        assert_eq!(producer.calls.load(Ordering::SeqCst), 2);
    }
}
