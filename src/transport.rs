use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::errors::TransportError;

pub mod memory;
pub mod sqs;

pub use memory::MemoryTransport;
pub use sqs::SqsTransport;

/// Opaque token identifying one delivery attempt of a message.
///
/// It is required to acknowledge that delivery and changes every time the
/// message is redelivered, unlike the message id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        ReceiptHandle(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ReceiptHandle {
    fn from(handle: String) -> Self {
        ReceiptHandle(handle)
    }
}

impl From<&str> for ReceiptHandle {
    fn from(handle: &str) -> Self {
        ReceiptHandle(handle.to_string())
    }
}

/// A message as delivered by the queue. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    receipt_handle: ReceiptHandle,
    body: String,
    receive_timestamp: SystemTime,
    receive_count: u32,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        receipt_handle: impl Into<ReceiptHandle>,
        body: impl Into<String>,
    ) -> Self {
        Message {
            id: id.into(),
            receipt_handle: receipt_handle.into(),
            body: body.into(),
            receive_timestamp: SystemTime::now(),
            receive_count: 1,
        }
    }

    /// Records how many times the queue has handed this message out,
    /// including this delivery.
    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn receipt_handle(&self) -> &ReceiptHandle {
        &self.receipt_handle
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn receive_timestamp(&self) -> SystemTime {
        self.receive_timestamp
    }

    pub fn receive_count(&self) -> u32 {
        self.receive_count
    }
}

/// A receipt handle the queue refused to acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedAck {
    pub receipt_handle: ReceiptHandle,
    pub code: String,
    pub message: String,
}

/// Per-handle outcome of one acknowledgement call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckReport {
    pub succeeded: Vec<ReceiptHandle>,
    pub rejected: Vec<RejectedAck>,
}

/// Network side of the consumer: fetching deliveries and acknowledging them.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Waits up to `wait_timeout` for at least one message.
    ///
    /// Returns an empty vector when nothing arrived in time.
    async fn fetch(
        &self,
        max_messages: usize,
        wait_timeout: Duration,
    ) -> Result<Vec<Message>, TransportError>;

    /// Acknowledges (deletes) the given deliveries.
    ///
    /// Handles can succeed or be rejected individually; an `Err` means the
    /// request as a whole did not go through.
    async fn acknowledge(&self, handles: &[ReceiptHandle]) -> Result<AckReport, TransportError>;
}
