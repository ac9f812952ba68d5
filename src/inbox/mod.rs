//! Inbox ingest: claim loop, bounded batching buffer, and transactional
//! persist-and-dispatch, per spec §4.4/§4.5.

pub mod consumer;
pub mod processor;

use async_trait::async_trait;

use crate::error::MessagingResult;

pub use consumer::InboxConsumer;
pub use processor::BatchProcessor;

/// User-supplied handler invoked once per inbox message, after the message's
/// row has been durably inserted with `status=pending`. A handler error does
/// not abort the enclosing transaction — it is recorded as `status=failed`
/// (spec §4.5, §7).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn dispatch(&self, topic: &str, payload: &serde_json::Value) -> MessagingResult<()>;
}
