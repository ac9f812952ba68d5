//! Claim loop with a time-and-size-bounded in-memory buffer, translated
//! idiomatically from the Go original's `inbox/consumer.go`
//! (`ConsumeClaim`'s select-loop over message/ticker/session-done/shutdown
//! branches, `insertMessage`'s lock-held append-and-maybe-flush, and
//! `flushBuffer`'s buffer-swap-and-send) onto a single `tokio::select!` loop
//! driven by one broker message stream rather than sarama's per-partition
//! `ConsumeClaim` callback (see `crate::broker`'s module doc for why).

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::broker::{BrokerConsumer, InboundMessage};
use crate::config::InboxConsumerConfig;
use crate::metrics::InboxMetrics;

/// Runs the claim loop: appends inbound messages to a lock-guarded buffer,
/// flushing it to `batch_tx` either when it crosses `max_buf_size` or when
/// the ticker fires, whichever comes first.
pub struct InboxConsumer<C: BrokerConsumer> {
    consumer: Arc<C>,
    config: InboxConsumerConfig,
    metrics: Option<InboxMetrics>,
}

impl<C: BrokerConsumer> InboxConsumer<C> {
    pub fn new(consumer: Arc<C>, config: InboxConsumerConfig) -> Self {
        Self {
            consumer,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: InboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until `shutdown_rx` fires or the broker stream closes. Messages
    /// still in the buffer at that point are left unflushed: they were never
    /// offset-marked, so the broker will redeliver them after rebalance.
    pub async fn run(
        &self,
        batch_tx: mpsc::Sender<Vec<InboundMessage>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let buffer: Mutex<Vec<InboundMessage>> =
            Mutex::new(Vec::with_capacity(self.config.buffer_capacity));
        let mut ticker = tokio::time::interval(self.config.ticker_interval);
        ticker.tick().await; // first tick fires immediately; consume it so the interval is the real cadence

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!("inbox consumer received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.flush_if_nonempty(&buffer, &batch_tx).await;
                }
                received = self.consumer.recv() => {
                    match received {
                        Ok(Some(message)) => {
                            if self.append_and_maybe_flush(&buffer, message, &batch_tx).await {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("broker stream closed, inbox consumer exiting");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "broker recv failed");
                        }
                    }
                }
            }
        }
    }

    /// Appends `message` to the buffer under the lock; if the buffer has
    /// reached `max_buf_size`, swaps it out and sends it to the batch
    /// channel while still holding the lock, so a concurrent ticker flush
    /// can never interleave with it. Returns `true` if the batch channel
    /// was closed and the caller should stop.
    async fn append_and_maybe_flush(
        &self,
        buffer: &Mutex<Vec<InboundMessage>>,
        message: InboundMessage,
        batch_tx: &mpsc::Sender<Vec<InboundMessage>>,
    ) -> bool {
        let mut guard = buffer.lock().await;
        guard.push(message);

        if let Some(metrics) = &self.metrics {
            metrics.buffer_size.set(guard.len() as i64);
        }

        if guard.len() < self.config.max_buf_size {
            return false;
        }

        let batch = std::mem::replace(&mut *guard, Vec::with_capacity(self.config.buffer_capacity));
        drop(guard);
        self.send_batch(batch, batch_tx).await
    }

    async fn flush_if_nonempty(
        &self,
        buffer: &Mutex<Vec<InboundMessage>>,
        batch_tx: &mpsc::Sender<Vec<InboundMessage>>,
    ) {
        let mut guard = buffer.lock().await;
        if guard.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut *guard, Vec::with_capacity(self.config.buffer_capacity));
        drop(guard);
        self.send_batch(batch, batch_tx).await;
    }

    /// Send `batch` to the batch channel. This blocks if the channel is
    /// full — the natural backpressure onto the broker described in spec
    /// §4.4: the claim loop stops draining until a batch worker frees
    /// capacity. Returns `true` if the channel was closed.
    async fn send_batch(&self, batch: Vec<InboundMessage>, batch_tx: &mpsc::Sender<Vec<InboundMessage>>) -> bool {
        let size = batch.len();
        if batch_tx.send(batch).await.is_err() {
            warn!("batch channel closed while flushing; dropping consumer loop");
            return true;
        }
        if let Some(metrics) = &self.metrics {
            metrics.flush_total.inc();
            metrics.buffer_size.set(0);
        }
        debug!(count = size, "inbox buffer flushed");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::MessagingResult;
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    struct ScriptedConsumer {
        messages: TokioMutex<Vec<InboundMessage>>,
    }

    #[async_trait]
    impl BrokerConsumer for ScriptedConsumer {
        async fn recv(&self) -> MessagingResult<Option<InboundMessage>> {
            let mut guard = self.messages.lock().await;
            if guard.is_empty() {
                // Park forever rather than returning None, so the test's
                // ticker branch is what drives the flush, not stream close.
                std::future::pending::<()>().await;
                unreachable!()
            }
            Ok(Some(guard.remove(0)))
        }

        async fn mark_offset(&self, _message: &InboundMessage) -> MessagingResult<()> {
            Ok(())
        }
    }

    fn message(n: i64) -> InboundMessage {
        InboundMessage {
            topic: "t".into(),
            partition: 0,
            offset: n,
            key: None,
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn ticker_flushes_a_buffer_below_the_size_threshold() {
        let consumer = Arc::new(ScriptedConsumer {
            messages: TokioMutex::new(vec![message(0), message(1), message(2)]),
        });
        let config = InboxConsumerConfig {
            max_buf_size: 1000,
            ticker_interval: Duration::from_millis(50),
            ..InboxConsumerConfig::default()
        };
        let inbox_consumer = InboxConsumer::new(consumer, config);
        let (batch_tx, mut batch_rx) = mpsc::channel(10);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            inbox_consumer.run(batch_tx, shutdown_rx).await;
        });

        let batch = tokio::time::timeout(Duration::from_secs(1), batch_rx.recv())
            .await
            .expect("ticker should have flushed within the timeout")
            .expect("batch channel should still be open");
        assert_eq!(batch.len(), 3);

        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn size_threshold_flushes_before_the_ticker() {
        let consumer = Arc::new(ScriptedConsumer {
            messages: TokioMutex::new(vec![message(0), message(1)]),
        });
        let config = InboxConsumerConfig {
            max_buf_size: 2,
            ticker_interval: Duration::from_secs(60),
            ..InboxConsumerConfig::default()
        };
        let inbox_consumer = InboxConsumer::new(consumer, config);
        let (batch_tx, mut batch_rx) = mpsc::channel(10);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            inbox_consumer.run(batch_tx, shutdown_rx).await;
        });

        let batch = tokio::time::timeout(Duration::from_millis(500), batch_rx.recv())
            .await
            .expect("size threshold should have flushed quickly")
            .expect("batch channel should still be open");
        assert_eq!(batch.len(), 2);

        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
