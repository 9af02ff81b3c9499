use std::str::FromStr;

use thiserror::Error;

use crate::transport::RejectedAck;

/// Error types for SQS consumer operations.
///
/// This enum represents the errors that can surface to the code that builds
/// and runs a consumer. Errors raised while the poll loop is running are
/// recovered locally and only ever reach the logs or the result callback.
#[derive(Debug, Error)]
pub enum SqsConsumerError {
    /// Missing or malformed settings, reported before anything connects.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("receiver task failed: {0}")]
    ReceiverTask(#[from] tokio::task::JoinError),
}

/// Network or authentication failure talking to the queue.
///
/// Never fatal: the poll loop backs off and fetches again, and a failed
/// acknowledgement is reported to the result callback.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to receive messages from {queue}: {reason}")]
    Receive { queue: String, reason: String },

    #[error("failed to acknowledge {count} message(s) on {queue}: {reason}")]
    Acknowledge {
        queue: String,
        count: usize,
        reason: String,
    },
}

/// Reason a handler gave for not processing a message.
///
/// The message is left unacknowledged and comes back once its visibility
/// timeout expires.
#[derive(Debug, Error)]
pub struct HandlerFailure(String);

impl HandlerFailure {
    /// Creates a new `HandlerFailure` with the provided reason.
    pub fn new(reason: impl Into<String>) -> Self {
        HandlerFailure(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HandlerFailure {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HandlerFailure::new(s))
    }
}

impl From<String> for HandlerFailure {
    fn from(s: String) -> Self {
        HandlerFailure::new(s)
    }
}

impl From<&str> for HandlerFailure {
    fn from(s: &str) -> Self {
        HandlerFailure::new(s)
    }
}

/// Why some or all receipt handles of a flushed batch were not acknowledged.
#[derive(Debug, Error)]
pub enum AckFailure {
    /// The whole acknowledgement request failed.
    #[error("acknowledgement request failed: {0}")]
    Transport(#[source] TransportError),

    /// The request went through but the queue refused some handles,
    /// typically because their receipt handle expired.
    #[error("{} receipt handle(s) rejected", .0.len())]
    Rejected(Vec<RejectedAck>),
}

/// Invalid or missing consumer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
