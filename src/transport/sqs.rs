use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, MessageSystemAttributeName};
use tracing::{debug, warn};

use super::{AckReport, Message, ReceiptHandle, RejectedAck, Transport};
use crate::errors::TransportError;

/// Largest number of messages a single `ReceiveMessage` call may return.
pub const MAX_RECEIVE_BATCH: usize = 10;
/// Largest number of entries a single `DeleteMessageBatch` call accepts.
pub const MAX_DELETE_BATCH: usize = 10;
/// Longest long-polling wait SQS allows.
pub const MAX_WAIT_TIME_SECONDS: u64 = 20;

/// [`Transport`] backed by an AWS SQS queue.
#[derive(Debug, Clone)]
pub struct SqsTransport {
    /// The AWS SQS client used to interact with the SQS service.
    sqs_client: aws_sdk_sqs::Client,

    queue_url: String,
}

impl SqsTransport {
    pub fn new(sqs_client: aws_sdk_sqs::Client, queue_url: &str) -> Self {
        SqsTransport {
            sqs_client,
            queue_url: queue_url.to_string(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    fn ack_error(&self, count: usize, reason: String) -> TransportError {
        TransportError::Acknowledge {
            queue: self.queue_url.clone(),
            count,
            reason,
        }
    }

    async fn delete_chunk(&self, chunk: &[ReceiptHandle]) -> Result<AckReport, TransportError> {
        let entries = delete_entries(chunk).map_err(|reason| self.ack_error(chunk.len(), reason))?;

        let output = self
            .sqs_client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| self.ack_error(chunk.len(), DisplayErrorContext(&e).to_string()))?;

        Ok(chunk_report(
            chunk,
            output.successful().iter().map(|entry| entry.id()),
            output.failed().iter().map(|entry| EntryFailure {
                id: entry.id(),
                code: entry.code(),
                message: entry.message().unwrap_or_default(),
            }),
        ))
    }
}

/// Batch entries for one chunk. Entry ids are positions within the chunk.
fn delete_entries(chunk: &[ReceiptHandle]) -> Result<Vec<DeleteMessageBatchRequestEntry>, String> {
    chunk
        .iter()
        .enumerate()
        .map(|(index, handle)| {
            DeleteMessageBatchRequestEntry::builder()
                .id(index.to_string())
                .receipt_handle(handle.as_str())
                .build()
                .map_err(|e| e.to_string())
        })
        .collect()
}

/// A failed entry as returned by `DeleteMessageBatch`.
struct EntryFailure<'a> {
    id: &'a str,
    code: &'a str,
    message: &'a str,
}

/// Maps the per-entry answers of one chunk back to its receipt handles.
/// Entries the service did not answer are rejected as `MissingResult`.
fn chunk_report<'a>(
    chunk: &[ReceiptHandle],
    successful: impl IntoIterator<Item = &'a str>,
    failed: impl IntoIterator<Item = EntryFailure<'a>>,
) -> AckReport {
    let mut report = AckReport::default();
    let mut answered = vec![false; chunk.len()];
    let position = |id: &str| id.parse::<usize>().ok().filter(|i| *i < chunk.len());

    for id in successful {
        if let Some(index) = position(id) {
            answered[index] = true;
            report.succeeded.push(chunk[index].clone());
        }
    }
    for entry in failed {
        if let Some(index) = position(entry.id) {
            answered[index] = true;
            report.rejected.push(RejectedAck {
                receipt_handle: chunk[index].clone(),
                code: entry.code.to_string(),
                message: entry.message.to_string(),
            });
        }
    }
    for (index, _) in answered.iter().enumerate().filter(|(_, seen)| !**seen) {
        report.rejected.push(RejectedAck {
            receipt_handle: chunk[index].clone(),
            code: "MissingResult".to_string(),
            message: "no result returned for entry".to_string(),
        });
    }

    report
}

/// Folds chunk outcomes into one report. A failed chunk rejects only its own
/// handles; the whole call fails only when every chunk failed.
fn merge_chunks<'a>(
    outcomes: impl IntoIterator<Item = (&'a [ReceiptHandle], Result<AckReport, TransportError>)>,
) -> Result<AckReport, TransportError> {
    let mut report = AckReport::default();
    let mut any_succeeded = false;
    let mut last_error = None;

    for (chunk, outcome) in outcomes {
        match outcome {
            Ok(answered) => {
                any_succeeded = true;
                report.succeeded.extend(answered.succeeded);
                report.rejected.extend(answered.rejected);
            }
            Err(e) => {
                debug!(error = %e, chunk_size = chunk.len(), "delete batch call failed");
                report
                    .rejected
                    .extend(chunk.iter().cloned().map(|receipt_handle| RejectedAck {
                        receipt_handle,
                        code: "TransportError".to_string(),
                        message: e.to_string(),
                    }));
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !any_succeeded => Err(e),
        _ => Ok(report),
    }
}

#[async_trait]
impl Transport for SqsTransport {
    async fn fetch(
        &self,
        max_messages: usize,
        wait_timeout: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        let max_number_of_messages = max_messages.clamp(1, MAX_RECEIVE_BATCH) as i32;
        let wait_time_seconds = wait_timeout.as_secs().min(MAX_WAIT_TIME_SECONDS) as i32;

        let output = self
            .sqs_client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_number_of_messages)
            .wait_time_seconds(wait_time_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| TransportError::Receive {
                queue: self.queue_url.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        let mut messages = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(
                    message_id = message.message_id().unwrap_or_default(),
                    "received a message without a receipt handle; it cannot be acknowledged"
                );
                continue;
            };
            let receive_count = message
                .attributes()
                .and_then(|attributes| {
                    attributes.get(&MessageSystemAttributeName::ApproximateReceiveCount)
                })
                .and_then(|count| count.parse().ok())
                .unwrap_or(1);

            messages.push(
                Message::new(
                    message.message_id().unwrap_or_default(),
                    receipt_handle,
                    message.body().unwrap_or_default(),
                )
                .with_receive_count(receive_count),
            );
        }

        Ok(messages)
    }

    async fn acknowledge(&self, handles: &[ReceiptHandle]) -> Result<AckReport, TransportError> {
        if handles.is_empty() {
            return Ok(AckReport::default());
        }

        let mut outcomes = Vec::with_capacity(handles.len().div_ceil(MAX_DELETE_BATCH));
        for chunk in handles.chunks(MAX_DELETE_BATCH) {
            outcomes.push((chunk, self.delete_chunk(chunk).await));
        }
        merge_chunks(outcomes)
    }
}
