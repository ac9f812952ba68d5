//! Broker adapter: publish batches of messages and consume them under a
//! consumer group with manual offset commit.
//!
//! Grounded in `transactional-outbox/src/lib.rs`'s `KafkaOutboxPublisher`
//! (idempotent `FutureProducer`, per-message publish with a timeout) for the
//! producer half. The pack carries no Rust consumer-group example at this
//! shape, so the consumer half is translated from the Go original's
//! `sarama.ConsumerGroup` usage (`examples/original_source/inbox/consumer.go`,
//! `message/message.go`'s `initKafka`) onto `rdkafka::consumer::StreamConsumer`,
//! which exposes one merged message stream per subscription rather than
//! sarama's per-partition `ConsumeClaim` callback — the inbox consumer's
//! claim loop (`crate::inbox::consumer`) runs over that single stream instead
//! of one loop per partition, which is the idiomatic rdkafka shape for the
//! same consumer-group semantics.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Message as _, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{MessagingError, MessagingResult};

/// A message ready to publish to the broker.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// A message received from the broker, with enough identity to mark its
/// offset later.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl From<OwnedMessage> for InboundMessage {
    fn from(msg: OwnedMessage) -> Self {
        InboundMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
        }
    }
}

/// Publishes batches of outbound messages. Implementations must either
/// publish the whole batch or fail it as a whole — no partial-success
/// reporting, since the outbox relay treats publish as idempotent at the
/// row level (`processed_at` is only set after a successful batch).
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    async fn publish_batch(&self, messages: &[OutboundMessage]) -> MessagingResult<()>;
}

/// Consumes messages under a consumer group with offsets committed only on
/// explicit `mark_offset` calls (auto-commit disabled).
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Block until the next inbound message is available, or `None` once the
    /// underlying stream has been closed (shutdown).
    async fn recv(&self) -> MessagingResult<Option<InboundMessage>>;

    /// Mark a message's offset committed. Offsets are staged locally and
    /// flushed asynchronously; callers must not rely on this returning only
    /// after the broker has durably stored the offset.
    async fn mark_offset(&self, message: &InboundMessage) -> MessagingResult<()>;
}

/// Build a `FutureProducer` matching the teacher's idempotent-producer
/// configuration, extended with the SASL/SCRAM-SHA-512 + TLS options carried
/// over from the Go original's `initKafka`.
pub fn build_producer(brokers: &str, config: &BrokerConfig) -> MessagingResult<FutureProducer> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", brokers)
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("max.in.flight.requests.per.connection", "5")
        .set("socket.timeout.ms", config.dial_timeout.as_millis().to_string());

    apply_sasl(&mut client_config, config);

    client_config
        .create()
        .map_err(|e| MessagingError::Other(anyhow::anyhow!("failed to build Kafka producer: {e}")))
}

/// Build a `StreamConsumer` for the given group, joined to `topics`, with
/// auto-commit disabled and the initial offset policy set to "newest" for
/// fresh groups, per spec.
pub fn build_consumer(
    brokers: &str,
    config: &BrokerConfig,
    group_id: &str,
) -> MessagingResult<StreamConsumer> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "latest")
        .set("socket.timeout.ms", config.dial_timeout.as_millis().to_string());

    apply_sasl(&mut client_config, config);

    let consumer: StreamConsumer = client_config
        .create()
        .map_err(|e| MessagingError::Other(anyhow::anyhow!("failed to build Kafka consumer: {e}")))?;

    Ok(consumer)
}

fn apply_sasl(client_config: &mut ClientConfig, config: &BrokerConfig) {
    if config.sasl_enabled {
        client_config
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanism", "SCRAM-SHA-512")
            .set("sasl.username", &config.sasl_username)
            .set("sasl.password", &config.sasl_password);
    }
}

/// Kafka-backed [`BrokerProducer`].
pub struct KafkaBrokerProducer {
    producer: FutureProducer,
    publish_timeout: Duration,
}

impl KafkaBrokerProducer {
    pub fn new(producer: FutureProducer) -> Self {
        Self {
            producer,
            publish_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl BrokerProducer for KafkaBrokerProducer {
    async fn publish_batch(&self, messages: &[OutboundMessage]) -> MessagingResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        // Sent one at a time, in order: messages within a claimed batch are
        // ordered by created_at ascending, and that order is the only
        // ordering guarantee the relay gives callers.
        for m in messages {
            let record = FutureRecord::to(&m.topic).key(&m.key).payload(&m.payload);
            if let Err((err, _)) = self.producer.send(record, self.publish_timeout).await {
                warn!(topic = %m.topic, key = %m.key, error = %err, "publish failed for message in batch");
                return Err(MessagingError::PublishFailed(err.to_string()));
            }
        }

        debug!(count = messages.len(), "published batch to broker");
        Ok(())
    }
}

/// Kafka-backed [`BrokerConsumer`].
pub struct KafkaBrokerConsumer {
    consumer: StreamConsumer,
}

impl KafkaBrokerConsumer {
    pub fn new(consumer: StreamConsumer, topics: &[String]) -> MessagingResult<Self> {
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| MessagingError::Other(anyhow::anyhow!("failed to subscribe to topics: {e}")))?;
        info!(topics = ?topics, "subscribed to broker topics");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl BrokerConsumer for KafkaBrokerConsumer {
    async fn recv(&self) -> MessagingResult<Option<InboundMessage>> {
        match self.consumer.recv().await {
            Ok(msg) => Ok(Some(InboundMessage::from(msg.detach()))),
            Err(rdkafka::error::KafkaError::PartitionEOF(_)) => Ok(None),
            Err(e) => Err(MessagingError::Other(anyhow::anyhow!("broker recv failed: {e}"))),
        }
    }

    async fn mark_offset(&self, message: &InboundMessage) -> MessagingResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|e| MessagingError::Other(anyhow::anyhow!("failed to stage offset: {e}")))?;

        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .map_err(|e| MessagingError::Other(anyhow::anyhow!("failed to commit offset: {e}")))?;

        debug!(topic = %message.topic, partition = message.partition, offset = message.offset, "offset marked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_message_carries_its_topic_and_key() {
        let m = OutboundMessage {
            topic: "orders".into(),
            key: "order-1".into(),
            payload: b"{}".to_vec(),
        };
        assert_eq!(m.topic, "orders");
        assert_eq!(m.key, "order-1");
    }

    #[test]
    fn build_producer_without_sasl_does_not_require_credentials() {
        let config = BrokerConfig {
            sasl_enabled: false,
            sasl_username: String::new(),
            sasl_password: String::new(),
            dial_timeout: Duration::from_secs(10),
        };
        assert!(build_producer("localhost:9092", &config).is_ok());
    }
}
