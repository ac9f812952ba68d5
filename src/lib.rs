//! # Transactional Outbox/Inbox Messaging
//!
//! This crate implements the transactional outbox/inbox pattern over
//! PostgreSQL and a partitioned log broker (Kafka). Applications that
//! produce domain events enqueue them into a local outbox row in the same
//! database transaction that mutates business state; a background relay
//! guarantees each row is eventually published to the broker exactly as
//! written. Symmetrically, consumed broker messages are persisted to a
//! local inbox table before any user handler is dispatched, giving
//! at-least-once delivery a durable deduplication and audit point.
//!
//! ## What this buys you
//!
//! Without this pattern:
//! - **Lost events**: the database commits but the broker publish fails.
//! - **Duplicate events**: the broker publish succeeds but the database
//!   commit fails.
//! - **Lost handling**: a consumed message is acted on, then the process
//!   crashes before the action's effects are durable, and redelivery either
//!   repeats work or is missed entirely.
//!
//! The core trades these failure modes for an accepted, documented duplicate
//! window (spec'd in the outbox relay and inbox processor modules below)
//! rather than attempting exactly-once end-to-end semantics.
//!
//! ## Producer-side usage
//!
//! ```rust,no_run
//! use transactional_messaging::outbox::OutboxWriter;
//! use transactional_messaging::store::SqlxStore;
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! async fn create_user(pool: &PgPool, writer: &OutboxWriter<SqlxStore>) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!
//!     sqlx::query("INSERT INTO users (id, name) VALUES ($1, $2)")
//!         .bind("11111111-1111-1111-1111-111111111111")
//!         .bind("Alice")
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     writer
//!         .save_tx(&mut tx, "user.created", "user-1", br#"{"name":"Alice"}"#)
//!         .await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Starting the relay
//!
//! The relay is never started implicitly by [`message::open`] — the caller
//! must invoke [`outbox::OutboxRelay::start`] explicitly (spec §9).
//!
//! ```rust,no_run
//! use transactional_messaging::config::{Config, RelayConfig};
//! use transactional_messaging::outbox::OutboxRelay;
//! use transactional_messaging::broker::{build_producer, KafkaBrokerProducer};
//! use transactional_messaging::store::SqlxStore;
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let pool = PgPool::connect(&config.postgres.connection_string()).await?;
//!     let store = Arc::new(SqlxStore::new(pool));
//!     let producer = Arc::new(KafkaBrokerProducer::new(build_producer("localhost:9092", &config.broker)?));
//!
//!     let relay = OutboxRelay::new(store, producer, RelayConfig::default());
//!     relay.start().await;
//!     tokio::signal::ctrl_c().await?;
//!     relay.stop().await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod inbox;
#[macro_use]
pub mod macros;
pub mod message;
pub mod metrics;
pub mod model;
pub mod outbox;
pub mod store;

pub use error::{MessagingError, MessagingResult, StoreError, StoreResult};
pub use inbox::{BatchProcessor, InboxConsumer, MessageHandler};
pub use message::{open, Inbox, Outbox, RequestContext, WebhookNotifier};
pub use model::{InboxRow, InboxStatus, NewInboxRow, NewOutboxRow, OutboxRow};
pub use outbox::{OutboxRelay, OutboxWriter};
pub use store::{SqlxStore, StoreAdapter};
