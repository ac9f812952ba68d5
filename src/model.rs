//! Row types for the outbox and inbox tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable outbox row as read back from storage.
///
/// `processed_at` is set exactly once, by the relay worker that publishes
/// the row; `is_deliver` always mirrors `processed_at.is_some()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: Uuid,
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub processed_at: Option<DateTime<Utc>>,
    pub is_deliver: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

/// Fields supplied by a caller inserting a new outbox row; the store adapter
/// fills in `id`, `created_at`, `processed_at = NULL`, `is_deliver = false`.
#[derive(Debug, Clone)]
pub struct NewOutboxRow {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub created_by: Option<String>,
}

/// Terminal status of an inbox row. `Pending` is the only non-terminal state;
/// once a row reaches `Processed` or `Failed` it is never transitioned again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxStatus {
    Pending,
    Processed,
    Failed,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "pending",
            InboxStatus::Processed => "processed",
            InboxStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for InboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InboxStatus::Pending),
            "processed" => Ok(InboxStatus::Processed),
            "failed" => Ok(InboxStatus::Failed),
            other => Err(format!("unknown inbox status: {other}")),
        }
    }
}

/// A durable inbox row as read back from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRow {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub status: InboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the batch processor when first observing a message.
#[derive(Debug, Clone)]
pub struct NewInboxRow {
    pub topic: String,
    pub payload: serde_json::Value,
}
