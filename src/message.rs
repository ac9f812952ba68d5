//! Top-level wiring: `Open`, schema bootstrap, and the `Outbox`/`Inbox`
//! facades, grounded in the Go original's `message/message.go` (`Open`,
//! `initDB`, `initKafka`) and in `db-pool`'s pool-construction style for the
//! `PgPoolOptions` setup.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::broker::{build_consumer, build_producer, KafkaBrokerConsumer, KafkaBrokerProducer};
use crate::config::Config;
use crate::error::{MessagingError, MessagingResult};
use crate::inbox::{BatchProcessor, InboxConsumer, MessageHandler};
use crate::metrics::{InboxMetrics, OutboxMetrics};
use crate::outbox::{OutboxRelay, OutboxWriter};
use crate::store::SqlxStore;

const CREATE_OUTBOXES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS outboxes (
        id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
        topic TEXT NOT NULL,
        key TEXT NOT NULL DEFAULT '',
        payload JSONB NOT NULL,
        processed_at TIMESTAMPTZ,
        is_deliver BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        created_by TEXT,
        updated_at TIMESTAMPTZ,
        updated_by TEXT
    )
"#;

const CREATE_INBOXES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS inboxes (
        id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
        topic TEXT NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        processed_at TIMESTAMPTZ
    )
"#;

/// Bootstrap the schema the core needs: the `uuid-ossp` extension and both
/// tables, created if absent. Mirrors the Go original's `initDB`; schema
/// migration beyond this is explicitly out of scope (spec §1).
async fn init_schema(pool: &PgPool) -> MessagingResult<()> {
    sqlx::query(r#"CREATE EXTENSION IF NOT EXISTS "uuid-ossp""#)
        .execute(pool)
        .await
        .map_err(MessagingError::from)?;
    sqlx::query(CREATE_OUTBOXES_TABLE)
        .execute(pool)
        .await
        .map_err(MessagingError::from)?;
    sqlx::query(CREATE_INBOXES_TABLE)
        .execute(pool)
        .await
        .map_err(MessagingError::from)?;

    info!("outbox/inbox schema ensured");
    Ok(())
}

/// Context threaded through every outbound webhook call, resolving spec
/// §9's third Open Question: the source left one call path without a
/// context; here `notify` cannot be called without one.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub correlation_id: Option<String>,
}

/// The webhook collaborator's interface. The core does not implement this —
/// it is an opaque, retrying HTTP POST owned by the embedding application
/// (spec §1) — but the trait lives here so applications have a typed seam
/// to plug one in alongside `Outbox`/`Inbox`.
#[async_trait::async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, context: &RequestContext, payload: &serde_json::Value) -> MessagingResult<()>;
}

/// Facade over the outbox writer and relay.
pub struct Outbox {
    writer: OutboxWriter<SqlxStore>,
    relay: Arc<OutboxRelay<SqlxStore, KafkaBrokerProducer>>,
}

impl Outbox {
    pub async fn save(&self, topic: &str, key: &str, payload: &[u8]) -> MessagingResult<()> {
        self.writer.save(topic, key, payload).await?;
        Ok(())
    }

    pub async fn save_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> MessagingResult<()> {
        self.writer.save_tx(tx, topic, key, payload).await?;
        Ok(())
    }

    /// Start the relay worker pool. Per spec §9, the caller must invoke this
    /// explicitly — `Open` never starts it implicitly.
    pub async fn start(&self) {
        self.relay.start().await;
    }

    pub async fn stop(&self) {
        self.relay.stop().await;
    }

    /// Release the broker producer handle. A no-op beyond `stop` today since
    /// the producer has no separate close step, kept for interface parity
    /// with spec §6's `Open`/`Start`/`Stop`/`Close` surface.
    pub async fn close(&self) {
        self.stop().await;
    }
}

/// Facade over the inbox consumer and batch processor. The handler is not
/// bound here — `Open` constructs only the broker/store plumbing, matching
/// the Go original's `Inbox.Start(ctx, handler)`, where the handler is
/// supplied at start time, not at open time (this also lets a handler close
/// over the `Outbox` returned alongside this `Inbox`, which does not exist
/// yet when `open()` runs).
pub struct Inbox {
    consumer: InboxConsumer<KafkaBrokerConsumer>,
    store: Arc<SqlxStore>,
    kafka_consumer: Arc<KafkaBrokerConsumer>,
    metrics: Option<InboxMetrics>,
    batch_channel_depth: usize,
}

type DynHandler = dyn MessageHandler;

impl Inbox {
    /// Run the consumer claim loop and batch processor until `shutdown_rx`
    /// fires or the broker session ends. Spawns both as concurrent tasks and
    /// waits for the consumer loop to return (processor exits once the
    /// consumer drops the batch channel sender).
    pub async fn start(self, handler: Box<dyn MessageHandler>, shutdown_rx: broadcast::Receiver<()>) {
        let (batch_tx, batch_rx) = mpsc::channel(self.batch_channel_depth);
        let processor_shutdown = shutdown_rx.resubscribe();

        let mut processor: BatchProcessor<SqlxStore, KafkaBrokerConsumer, DynHandler> =
            BatchProcessor::new(self.store, self.kafka_consumer, Arc::from(handler));
        if let Some(metrics) = self.metrics {
            processor = processor.with_metrics(metrics);
        }

        let processor_task = tokio::spawn(async move {
            processor.run(batch_rx, processor_shutdown).await;
        });

        self.consumer.run(batch_tx, shutdown_rx).await;
        let _ = processor_task.await;
    }
}

/// Constructs the subsystem: opens the database pool, ensures the schema,
/// and builds broker producer/consumer handles. Mirrors spec §6's
/// `Open(brokers, config)` — the broker address list is a constructor
/// argument, not read from the environment. Takes no handler: per spec §6,
/// the handler is supplied later to `Inbox::start`, not here.
pub async fn open(
    brokers: &str,
    config: Config,
    service_name: &str,
) -> MessagingResult<(PgPool, Outbox, Inbox)> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.postgres.connection_string())
        .await
        .map_err(MessagingError::from)?;

    init_schema(&pool).await?;

    let store = Arc::new(SqlxStore::new(pool.clone()));

    let producer = Arc::new(KafkaBrokerProducer::new(build_producer(brokers, &config.broker)?));
    let outbox_metrics = OutboxMetrics::new(service_name);
    let relay = Arc::new(
        OutboxRelay::new(Arc::clone(&store), producer, config.relay.clone())
            .with_metrics(outbox_metrics),
    );
    let outbox = Outbox {
        writer: OutboxWriter::new(Arc::clone(&store)),
        relay,
    };

    let raw_consumer = build_consumer(brokers, &config.broker, &config.inbox.group_id)?;
    let kafka_consumer = Arc::new(KafkaBrokerConsumer::new(raw_consumer, &config.inbox.topics)?);
    let inbox_metrics = InboxMetrics::new(service_name);
    let consumer =
        InboxConsumer::new(Arc::clone(&kafka_consumer), config.inbox.clone()).with_metrics(inbox_metrics.clone());
    let inbox = Inbox {
        consumer,
        store,
        kafka_consumer,
        metrics: Some(inbox_metrics),
        batch_channel_depth: config.inbox.batch_channel_depth,
    };

    info!(service = service_name, "transactional messaging subsystem opened");
    Ok((pool, outbox, inbox))
}
