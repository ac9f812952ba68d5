//! Batch processor: one database transaction per batch, per spec §4.5.
//! Grounded in the Go original's `inbox/consumer.go`'s `processBatches` (the
//! unmarshal → insert pending → dispatch → mark terminal → mark offset →
//! commit pipeline) and in `inbox/inbox.go`'s single-insert `InboxManager`
//! shape — the spec's resolved Open Question (§9) that rejects the
//! alternative `model/inbox.go` double-insert variant.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::broker::{BrokerConsumer, InboundMessage};
use crate::error::{MessagingError, MessagingResult, StoreError};
use crate::inbox::MessageHandler;
use crate::metrics::InboxMetrics;
use crate::model::{InboxStatus, NewInboxRow};
use crate::store::StoreAdapter;

/// Reads batches from the batch channel and processes each inside one
/// database transaction.
pub struct BatchProcessor<S: StoreAdapter, C: BrokerConsumer, H: MessageHandler + ?Sized> {
    store: Arc<S>,
    consumer: Arc<C>,
    handler: Arc<H>,
    metrics: Option<InboxMetrics>,
}

impl<S, C, H> BatchProcessor<S, C, H>
where
    S: StoreAdapter,
    C: BrokerConsumer,
    H: MessageHandler + ?Sized,
{
    pub fn new(store: Arc<S>, consumer: Arc<C>, handler: Arc<H>) -> Self {
        Self {
            store,
            consumer,
            handler,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: InboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until `shutdown_rx` fires or the batch channel closes.
    pub async fn run(
        &self,
        mut batch_rx: mpsc::Receiver<Vec<InboundMessage>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!("batch processor received shutdown signal");
                    break;
                }
                batch = batch_rx.recv() => {
                    match batch {
                        Some(batch) => {
                            let size = batch.len();
                            if let Err(e) = self.process_batch(batch).await {
                                error!(error = %e, batch_size = size, "batch aborted, will be redelivered");
                                if let Some(metrics) = &self.metrics {
                                    metrics.batch_errors_total.inc();
                                }
                            }
                        }
                        None => {
                            debug!("batch channel closed, batch processor exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Process one batch inside a single transaction. A parse failure or a
    /// storage error anywhere in the batch aborts (and thus rolls back) the
    /// whole transaction, leaving every message in the batch to be
    /// redelivered. A handler error is recorded as `status=failed` and does
    /// NOT abort the transaction or the batch.
    async fn process_batch(&self, batch: Vec<InboundMessage>) -> MessagingResult<()> {
        let mut tx = self.store.begin().await?;
        let mut terminal = Vec::with_capacity(batch.len());

        for message in &batch {
            let payload: serde_json::Value = serde_json::from_slice(&message.payload)?;
            if !payload.is_object() {
                return Err(MessagingError::InvalidPayload(
                    "inbox payload must be a JSON object".to_string(),
                ));
            }

            let row = self
                .store
                .insert_inbox(
                    &mut tx,
                    NewInboxRow {
                        topic: message.topic.clone(),
                        payload,
                    },
                )
                .await?;

            let status = match self.handler.dispatch(&message.topic, &row.payload).await {
                Ok(()) => InboxStatus::Processed,
                Err(e) => {
                    warn!(inbox_id = %row.id, error = %e, "handler dispatch failed, marking failed");
                    InboxStatus::Failed
                }
            };

            let processed_at = Utc::now();
            self.store
                .update_inbox_status(&mut tx, row.id, status, processed_at)
                .await?;

            terminal.push((message.clone(), status));
        }

        tx.commit().await.map_err(StoreError::from)?;

        // Offsets are committed only after the DB transaction above has
        // committed: marking them earlier risks a crash between offset
        // commit and DB commit turning a redelivery into a silent loss.
        for (message, status) in terminal {
            if let Err(e) = self.consumer.mark_offset(&message).await {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "failed to mark broker offset after commit; message may be redelivered"
                );
            }

            if let Some(metrics) = &self.metrics {
                match status {
                    InboxStatus::Processed => metrics.processed_total.inc(),
                    InboxStatus::Failed => metrics.failed_total.inc(),
                    InboxStatus::Pending => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysFailHandler;

    #[async_trait]
    impl MessageHandler for AlwaysFailHandler {
        async fn dispatch(&self, _topic: &str, _payload: &serde_json::Value) -> MessagingResult<()> {
            Err(MessagingError::Other(anyhow::anyhow!("boom")))
        }
    }

    struct AlwaysOkHandler;

    #[async_trait]
    impl MessageHandler for AlwaysOkHandler {
        async fn dispatch(&self, _topic: &str, _payload: &serde_json::Value) -> MessagingResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_failure_maps_to_failed_status_not_an_error() {
        let handler = AlwaysFailHandler;
        let result = handler.dispatch("t", &serde_json::json!({})).await;
        assert!(result.is_err());
        // A handler error is data (mapped to InboxStatus::Failed by
        // process_batch), never propagated as a batch abort by itself.
    }

    #[tokio::test]
    async fn handler_success_is_ok() {
        let handler = AlwaysOkHandler;
        assert!(handler.dispatch("t", &serde_json::json!({})).await.is_ok());
    }
}
