//! Convenience macros for writing outbox rows, adapted from the teacher's
//! `publish_event!`/`publish_event_with_metadata!` to the simpler
//! `topic`/`key`/`payload` row shape (spec §3, §4.6) instead of the
//! teacher's aggregate-event shape.

/// Serialize `$payload` to JSON and insert it into the outbox within the
/// caller's transaction, identically to calling
/// `writer.save_tx(tx, topic, key, &bytes).await` but without the manual
/// `serde_json::to_vec` step.
///
/// # Usage
///
/// ```rust,no_run
/// use transactional_messaging::{save_outbox_tx, outbox::OutboxWriter};
/// use transactional_messaging::store::SqlxStore;
/// use sqlx::PgPool;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example(pool: PgPool, writer: OutboxWriter<SqlxStore>) -> Result<(), Box<dyn std::error::Error>> {
/// let mut tx = pool.begin().await?;
///
/// sqlx::query("INSERT INTO users (id, name) VALUES ($1, $2)")
///     .bind("11111111-1111-1111-1111-111111111111")
///     .bind("Alice")
///     .execute(&mut *tx)
///     .await?;
///
/// save_outbox_tx!(&mut tx, &writer, "user.created", "user-1", json!({ "name": "Alice" }))?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! save_outbox_tx {
    ($tx:expr, $writer:expr, $topic:expr, $key:expr, $payload:expr) => {{
        let bytes = serde_json::to_vec(&$payload).map_err($crate::error::MessagingError::from);
        match bytes {
            Ok(bytes) => $writer.save_tx($tx, $topic, $key, &bytes).await,
            Err(e) => Err(e),
        }
    }};
}

/// Auto-committing counterpart to [`save_outbox_tx`].
#[macro_export]
macro_rules! save_outbox {
    ($writer:expr, $topic:expr, $key:expr, $payload:expr) => {{
        let bytes = serde_json::to_vec(&$payload).map_err($crate::error::MessagingError::from);
        match bytes {
            Ok(bytes) => $writer.save($topic, $key, &bytes).await,
            Err(e) => Err(e),
        }
    }};
}

#[cfg(test)]
mod tests {
    // Macro tests are compile-time checks; if this crate compiles, the
    // macros are syntactically correct.
}
