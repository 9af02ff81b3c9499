//! Consumer configuration loaded from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `SQS_QUEUE_URL` | required |
//! | `SQS_ENDPOINT_URL` | unset (point at LocalStack with `http://localhost:4566`) |
//! | `AWS_REGION` | SDK default chain |
//! | `SQS_ACCESS_KEY_ID` / `SQS_SECRET_ACCESS_KEY` | unset (static credentials, both or neither) |
//! | `SQS_MAX_MESSAGES` | 10 |
//! | `SQS_WAIT_TIME_SECONDS` | 20 |
//! | `ACK_MAX_BATCH_SIZE` | 10 |
//! | `ACK_INTERVAL_MS` | 3000 |
//! | `FETCH_BACKOFF_INITIAL_MS` | 100 |
//! | `FETCH_BACKOFF_MAX_MS` | 30000 |

use std::str::FromStr;
use std::time::Duration;

use crate::acknowledgement::AckSettings;
use crate::errors::ConfigError;
use crate::receiver::ReceiverConfig;
use crate::transport::sqs::{MAX_RECEIVE_BATCH, MAX_WAIT_TIME_SECONDS};

/// How to reach SQS. Empty settings defer to the SDK's default chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub static_credentials: Option<StaticCredentials>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue_url: String,
    pub client: ClientSettings,
    pub receiver: ReceiverConfig,
    pub ack: AckSettings,
}

/// Loads `.env` if present, then reads the process environment.
pub fn load_config() -> Result<ConsumerConfig, ConfigError> {
    dotenvy::dotenv().ok();
    ConsumerConfig::from_lookup(|key| std::env::var(key).ok())
}

impl ConsumerConfig {
    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let queue_url = get("SQS_QUEUE_URL").ok_or(ConfigError::Missing("SQS_QUEUE_URL"))?;

        let static_credentials = match (get("SQS_ACCESS_KEY_ID"), get("SQS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SQS_SECRET_ACCESS_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SQS_ACCESS_KEY_ID")),
        };

        let max_number_of_messages: usize = parse(&get, "SQS_MAX_MESSAGES", MAX_RECEIVE_BATCH)?;
        if !(1..=MAX_RECEIVE_BATCH).contains(&max_number_of_messages) {
            return Err(ConfigError::invalid(
                "SQS_MAX_MESSAGES",
                max_number_of_messages,
                format!("must be between 1 and {MAX_RECEIVE_BATCH}"),
            ));
        }

        let wait_time_seconds: u64 = parse(&get, "SQS_WAIT_TIME_SECONDS", MAX_WAIT_TIME_SECONDS)?;
        if wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ConfigError::invalid(
                "SQS_WAIT_TIME_SECONDS",
                wait_time_seconds,
                format!("must be at most {MAX_WAIT_TIME_SECONDS}"),
            ));
        }

        let backoff_initial_ms: u64 = parse(&get, "FETCH_BACKOFF_INITIAL_MS", 100)?;
        let backoff_max_ms: u64 = parse(&get, "FETCH_BACKOFF_MAX_MS", 30_000)?;
        if backoff_max_ms < backoff_initial_ms {
            return Err(ConfigError::invalid(
                "FETCH_BACKOFF_MAX_MS",
                backoff_max_ms,
                "must not be below FETCH_BACKOFF_INITIAL_MS",
            ));
        }

        let ack_max_batch_size: usize = parse(&get, "ACK_MAX_BATCH_SIZE", 10)?;
        let ack_interval_ms: u64 = parse(&get, "ACK_INTERVAL_MS", 3_000)?;
        let ack = AckSettings::new(ack_max_batch_size, Duration::from_millis(ack_interval_ms))
            .map_err(|e| match e {
                ConfigError::Invalid { key, value, reason } => ConfigError::Invalid {
                    key: match key {
                        "max_batch_size" => "ACK_MAX_BATCH_SIZE",
                        _ => "ACK_INTERVAL_MS",
                    },
                    value,
                    reason,
                },
                other => other,
            })?;

        Ok(ConsumerConfig {
            queue_url,
            client: ClientSettings {
                endpoint_url: get("SQS_ENDPOINT_URL"),
                region: get("AWS_REGION"),
                static_credentials,
            },
            receiver: ReceiverConfig {
                max_number_of_messages,
                wait_time: Duration::from_secs(wait_time_seconds),
                backoff_initial: Duration::from_millis(backoff_initial_ms),
                backoff_max: Duration::from_millis(backoff_max_ms),
            },
            ack,
        })
    }
}

fn parse<V, G>(get: &G, key: &'static str, default: V) -> Result<V, ConfigError>
where
    V: FromStr,
    V::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: V::Err| ConfigError::invalid(key, &raw, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ConsumerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConsumerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_listener_setup() {
        let config = config_from(&[("SQS_QUEUE_URL", "http://localhost:4566/000000000000/orders")])
            .unwrap();

        assert_eq!(config.receiver.max_number_of_messages, 10);
        assert_eq!(config.receiver.wait_time, Duration::from_secs(20));
        assert_eq!(config.ack.max_batch_size(), 10);
        assert_eq!(config.ack.max_batch_age(), Duration::from_secs(3));
        assert_eq!(config.client, ClientSettings::default());
    }

    #[test]
    fn queue_url_is_required() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::Missing("SQS_QUEUE_URL"))
        ));
    }

    #[test]
    fn reads_localstack_overrides() {
        let config = config_from(&[
            ("SQS_QUEUE_URL", "http://localhost:4566/000000000000/orders"),
            ("SQS_ENDPOINT_URL", "http://localhost:4566"),
            ("AWS_REGION", "us-east-1"),
            ("SQS_ACCESS_KEY_ID", "test"),
            ("SQS_SECRET_ACCESS_KEY", "test"),
            ("ACK_MAX_BATCH_SIZE", "3"),
            ("ACK_INTERVAL_MS", "500"),
        ])
        .unwrap();

        assert_eq!(config.client.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.client.region.as_deref(), Some("us-east-1"));
        assert!(config.client.static_credentials.is_some());
        assert_eq!(config.ack.max_batch_size(), 3);
        assert_eq!(config.ack.max_batch_age(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_bad_values() {
        let base = ("SQS_QUEUE_URL", "q");
        assert!(matches!(
            config_from(&[base, ("ACK_MAX_BATCH_SIZE", "0")]),
            Err(ConfigError::Invalid { key: "ACK_MAX_BATCH_SIZE", .. })
        ));
        assert!(matches!(
            config_from(&[base, ("SQS_MAX_MESSAGES", "11")]),
            Err(ConfigError::Invalid { key: "SQS_MAX_MESSAGES", .. })
        ));
        assert!(matches!(
            config_from(&[base, ("SQS_WAIT_TIME_SECONDS", "soon")]),
            Err(ConfigError::Invalid { key: "SQS_WAIT_TIME_SECONDS", .. })
        ));
        assert!(matches!(
            config_from(&[base, ("SQS_ACCESS_KEY_ID", "test")]),
            Err(ConfigError::Missing("SQS_SECRET_ACCESS_KEY"))
        ));
    }
}
