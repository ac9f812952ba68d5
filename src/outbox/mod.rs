//! Outbox writer: `Save`/`SaveTx`, per spec §4.6.

pub mod relay;

use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::debug;

use crate::error::{MessagingError, MessagingResult};
use crate::model::{NewOutboxRow, OutboxRow};
use crate::store::StoreAdapter;

pub use relay::{OutboxRelay, RelayHandle};

/// Validate that `payload` parses as a JSON object, per spec §4.6.
pub(crate) fn parse_payload_object(payload: &[u8]) -> MessagingResult<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(MessagingError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Inserts outbox rows, optionally within a caller-supplied transaction so
/// the write is atomic with business state.
pub struct OutboxWriter<S: StoreAdapter> {
    store: Arc<S>,
}

impl<S: StoreAdapter> OutboxWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// `Save(topic, key, payload)`: auto-commits a single insert.
    pub async fn save(&self, topic: &str, key: &str, payload: &[u8]) -> MessagingResult<OutboxRow> {
        let value = parse_payload_object(payload)?;
        let row = self
            .store
            .insert_outbox(NewOutboxRow {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: value,
                created_by: None,
            })
            .await?;

        debug!(outbox_id = %row.id, topic = %topic, "outbox row saved");
        Ok(row)
    }

    /// `SaveTx(tx, topic, key, payload)`: participates in the caller's
    /// transaction, so a rollback there also discards the outbox row.
    pub async fn save_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> MessagingResult<OutboxRow> {
        let value = parse_payload_object(payload)?;
        let row = self
            .store
            .insert_outbox_tx(
                tx,
                NewOutboxRow {
                    topic: topic.to_string(),
                    key: key.to_string(),
                    payload: value,
                    created_by: None,
                },
            )
            .await?;

        debug!(outbox_id = %row.id, topic = %topic, "outbox row saved in caller transaction");
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_payload_is_accepted() {
        let value = parse_payload_object(br#"{"a":1}"#).unwrap();
        assert!(value.is_object());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(parse_payload_object(b"[1,2,3]").is_err());
        assert!(parse_payload_object(b"\"just a string\"").is_err());
        assert!(parse_payload_object(b"not json at all").is_err());
    }
}
