use std::time::Duration;

/// Configuration for the poll loop.
///
/// This struct defines the parameters for receiving messages from the queue,
/// including the batch size and long-polling wait, plus the backoff applied
/// when fetching fails.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// The maximum number of messages to receive in a single request.
    pub max_number_of_messages: usize,

    /// How long a single fetch may wait for messages to arrive.
    pub wait_time: Duration,

    /// First delay after a failed fetch.
    pub backoff_initial: Duration,

    /// Upper bound on the delay between failed fetches.
    pub backoff_max: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            max_number_of_messages: 10,
            wait_time: Duration::from_secs(20),
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(30),
        }
    }
}
