//! Operator CLI for replaying outbox rows, adapted from the teacher's
//! `transactional-outbox/src/bin/outbox-cli.rs` to spec's `processed_at`/
//! `is_deliver` columns (the teacher's variant resets `published_at`).
//!
//! Usage:
//!   outbox-replay replay-since <rfc3339-timestamp> <database-url>
//!   outbox-replay replay-range <from-uuid> <to-uuid> <database-url>

use chrono::DateTime;
use sqlx::PgPool;
use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transactional_messaging::store::SqlxStore;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("replay-since") => {
            let ts = args.get(2).ok_or("missing <rfc3339-timestamp>")?;
            let database_url = args.get(3).ok_or("missing <database-url>")?;
            let since = DateTime::parse_from_rfc3339(ts)?.with_timezone(&chrono::Utc);

            let pool = PgPool::connect(database_url).await?;
            let store = SqlxStore::new(pool);
            let affected = store.replay_since(since).await?;
            println!("replayed {affected} outbox row(s) created since {ts}");
        }
        Some("replay-range") => {
            let from_id: Uuid = args.get(2).ok_or("missing <from-uuid>")?.parse()?;
            let to_id: Uuid = args.get(3).ok_or("missing <to-uuid>")?.parse()?;
            let database_url = args.get(4).ok_or("missing <database-url>")?;

            let pool = PgPool::connect(database_url).await?;
            let store = SqlxStore::new(pool);
            let affected = store.replay_range(from_id, to_id).await?;
            println!("replayed {affected} outbox row(s) in range [{from_id}, {to_id}]");
        }
        _ => {
            eprintln!(
                "usage:\n  outbox-replay replay-since <rfc3339-timestamp> <database-url>\n  outbox-replay replay-range <from-uuid> <to-uuid> <database-url>"
            );
            std::process::exit(1);
        }
    }

    Ok(())
}
