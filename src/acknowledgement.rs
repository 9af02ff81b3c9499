//! Batched manual acknowledgement.
//!
//! Successful deliveries are not deleted one by one. Their receipt handles
//! are collected by an [`AckBatcher`] and submitted together once the batch
//! is full or its oldest handle has waited long enough, and every attempt is
//! reported to a [`ResultCallback`].

use std::collections::HashSet;
use std::fmt;

use tokio::time::Instant;

use crate::errors::{AckFailure, TransportError};
use crate::transport::{AckReport, ReceiptHandle, RejectedAck};

mod batcher;
mod callback;
mod config;

pub use batcher::AckBatcher;
pub use callback::{LoggingResultCallback, ResultCallback};
pub use config::AckSettings;

/// A receipt handle waiting to be acknowledged.
#[derive(Debug, Clone)]
pub struct AckRequest {
    receipt_handle: ReceiptHandle,
    enqueued_at: Instant,
}

impl AckRequest {
    pub fn new(receipt_handle: ReceiptHandle) -> Self {
        AckRequest {
            receipt_handle,
            enqueued_at: Instant::now(),
        }
    }

    pub fn receipt_handle(&self) -> &ReceiptHandle {
        &self.receipt_handle
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}

/// Requests accumulated between two flushes, in enqueue order.
#[derive(Debug, Clone, Default)]
pub struct AckBatch {
    requests: Vec<AckRequest>,
}

impl AckBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn receipt_handles(&self) -> Vec<ReceiptHandle> {
        self.requests
            .iter()
            .map(|request| request.receipt_handle.clone())
            .collect()
    }
}

impl From<Vec<AckRequest>> for AckBatch {
    fn from(requests: Vec<AckRequest>) -> Self {
        AckBatch { requests }
    }
}

/// Outcome of one flush attempt.
#[derive(Debug)]
pub enum FlushResult {
    /// Every handle in the batch was acknowledged.
    Success { batch: AckBatch },

    /// Some or all handles were not acknowledged. Those messages will be
    /// redelivered once their visibility timeout expires.
    Failure {
        batch: AckBatch,
        succeeded: Vec<ReceiptHandle>,
        failed: Vec<ReceiptHandle>,
        cause: AckFailure,
    },
}

impl FlushResult {
    pub(crate) fn from_outcome(batch: AckBatch, outcome: Result<AckReport, TransportError>) -> Self {
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                let failed = batch.receipt_handles();
                return FlushResult::Failure {
                    batch,
                    succeeded: Vec::new(),
                    failed,
                    cause: AckFailure::Transport(e),
                };
            }
        };

        let AckReport {
            succeeded,
            mut rejected,
        } = report;
        let answered: HashSet<&ReceiptHandle> = succeeded
            .iter()
            .chain(rejected.iter().map(|r| &r.receipt_handle))
            .collect();
        let unanswered: Vec<RejectedAck> = batch
            .requests
            .iter()
            .filter(|request| !answered.contains(&request.receipt_handle))
            .map(|request| RejectedAck {
                receipt_handle: request.receipt_handle.clone(),
                code: "MissingResult".to_string(),
                message: "transport did not report on this handle".to_string(),
            })
            .collect();
        rejected.extend(unanswered);

        if rejected.is_empty() {
            return FlushResult::Success { batch };
        }

        let failed = rejected.iter().map(|r| r.receipt_handle.clone()).collect();
        FlushResult::Failure {
            batch,
            succeeded,
            failed,
            cause: AckFailure::Rejected(rejected),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FlushResult::Success { .. })
    }

    pub fn batch(&self) -> &AckBatch {
        match self {
            FlushResult::Success { batch } | FlushResult::Failure { batch, .. } => batch,
        }
    }

    /// Handles that were acknowledged.
    pub fn succeeded(&self) -> Vec<ReceiptHandle> {
        match self {
            FlushResult::Success { batch } => batch.receipt_handles(),
            FlushResult::Failure { succeeded, .. } => succeeded.clone(),
        }
    }

    /// Handles that were not acknowledged.
    pub fn failed(&self) -> &[ReceiptHandle] {
        match self {
            FlushResult::Success { .. } => &[],
            FlushResult::Failure { failed, .. } => failed,
        }
    }
}

/// What caused a flush; only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTrigger {
    Size,
    Age,
    Manual,
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Age => "age",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}
