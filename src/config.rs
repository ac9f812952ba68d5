//! Configuration loading, grounded in `db-pool/src/lib.rs`'s
//! `DbConfig::from_env` pattern (parse-and-fall-back-to-default per field)
//! and in the Go original's `message/env.go` (`godotenv.Load()` +
//! `env.ParseWithOptions(v, env.Options{Prefix: "MSG_"})`).

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Postgres connection settings, read from `MSG_PG_*` environment variables.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl PostgresConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_string_or("MSG_PG_HOST", "localhost"),
            port: env_or("MSG_PG_PORT", 5432),
            user: env_string_or("MSG_PG_USER", "postgres"),
            password: env_string_or("MSG_PG_PASSWORD", ""),
            database: env_string_or("MSG_PG_DATABASE", "postgres"),
        }
    }

    /// Assemble a `postgres://` connection string from the individual fields.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Broker auth/tuning settings, read from `MSG_SASL`/`MSG_KAFKA_USERNAME`/
/// `MSG_KAFKA_PASSWORD`. The broker address list itself is not an env var
/// (spec §6: `Open(brokers, config)` takes it as an explicit argument,
/// mirroring the Go original, which never reads it from the environment).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub sasl_enabled: bool,
    pub sasl_username: String,
    pub sasl_password: String,
    pub dial_timeout: Duration,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self {
            sasl_enabled: env_or("MSG_SASL", false),
            sasl_username: env_string_or("MSG_KAFKA_USERNAME", ""),
            sasl_password: env_string_or("MSG_KAFKA_PASSWORD", ""),
            dial_timeout: Duration::from_secs(env_or("MSG_KAFKA_DIAL_TIMEOUT_SECS", 10)),
        }
    }
}

/// Top-level configuration assembled from `MSG_`-prefixed environment
/// variables, mirroring the Go original's env-driven `Open` path.
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_base_url: String,
    pub postgres: PostgresConfig,
    pub broker: BrokerConfig,
    pub relay: RelayConfig,
    pub inbox: InboxConsumerConfig,
}

impl Config {
    /// Load a `.env` file if present (mirrors the Go original's
    /// `godotenv.Load()`, which is also best-effort) and then read every
    /// `MSG_`-prefixed variable, falling back to spec defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            webhook_base_url: env_string_or("MSG_WEBHOOK_BASE_URL", ""),
            postgres: PostgresConfig::from_env(),
            broker: BrokerConfig::from_env(),
            relay: RelayConfig {
                worker_count: env_or("MSG_WORKER_COUNT", RelayConfig::default().worker_count),
                batch_size: env_or("MSG_BATCH_SIZE", RelayConfig::default().batch_size),
                ..RelayConfig::default()
            },
            inbox: InboxConsumerConfig {
                group_id: env_string_or("MSG_GROUP_ID", ""),
                topics: env_string_or("MSG_KAFKA_TOPICS", "")
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
                buffer_capacity: env_or(
                    "MSG_BUFFER_CAPACITY",
                    InboxConsumerConfig::default().buffer_capacity,
                ),
                max_buf_size: env_or(
                    "MSG_MAX_BUF_SIZE",
                    InboxConsumerConfig::default().max_buf_size,
                ),
                ticker_interval: Duration::from_secs(env_or(
                    "MSG_TICKER_INTERVAL_SECS",
                    InboxConsumerConfig::default().ticker_interval.as_secs(),
                )),
                ..InboxConsumerConfig::default()
            },
        }
    }
}

/// Outbox relay tuning, defaults per spec §4.3/§6.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub worker_count: usize,
    pub batch_size: i64,
    pub poll_interval: Duration,
    /// Grace period given to in-flight workers to finish their current
    /// transaction after a shutdown signal, before `stop()` gives up waiting.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            batch_size: 100,
            poll_interval: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// Inbox consumer tuning, defaults per spec §4.4/§6.
#[derive(Debug, Clone)]
pub struct InboxConsumerConfig {
    pub group_id: String,
    pub topics: Vec<String>,
    pub buffer_capacity: usize,
    pub max_buf_size: usize,
    pub ticker_interval: Duration,
    pub batch_channel_depth: usize,
}

impl Default for InboxConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            topics: Vec::new(),
            buffer_capacity: 10_000,
            max_buf_size: 8_000,
            ticker_interval: Duration::from_secs(10),
            batch_channel_depth: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_config_defaults_match_spec() {
        let config = RelayConfig::default();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn inbox_config_defaults_match_spec() {
        let config = InboxConsumerConfig::default();
        assert_eq!(config.buffer_capacity, 10_000);
        assert_eq!(config.max_buf_size, 8_000);
        assert!(config.max_buf_size <= config.buffer_capacity);
        assert_eq!(config.ticker_interval, Duration::from_secs(10));
        assert_eq!(config.batch_channel_depth, 100);
    }

    #[test]
    fn kafka_topics_env_var_splits_and_trims_into_inbox_topics() {
        std::env::set_var("MSG_KAFKA_TOPICS", " orders, payments ,,shipments");
        let config = Config::from_env();
        std::env::remove_var("MSG_KAFKA_TOPICS");
        assert_eq!(config.inbox.topics, vec!["orders", "payments", "shipments"]);
    }

    #[test]
    fn postgres_config_assembles_connection_string() {
        let config = PostgresConfig {
            host: "db".into(),
            port: 5432,
            user: "u".into(),
            password: "p".into(),
            database: "app".into(),
        };
        assert_eq!(config.connection_string(), "postgres://u:p@db:5432/app");
    }
}
