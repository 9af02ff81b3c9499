//! In-process queue with SQS-like delivery semantics.
//!
//! Every delivery gets a fresh receipt handle and hides the message for the
//! visibility timeout. A message that is not acknowledged in time becomes
//! visible again and is redelivered with a new handle; the old handle is then
//! rejected. Failures can be injected to exercise the consumer's recovery paths.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{AckReport, Message, ReceiptHandle, RejectedAck, Transport};
use crate::errors::TransportError;

const QUEUE_NAME: &str = "memory";

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    receive_count: u32,
    receipt_handle: Option<ReceiptHandle>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    next_id: u64,
    failing_fetches: u32,
    failing_acknowledges: u32,
    rejected_handles: HashSet<ReceiptHandle>,
    fetch_calls: usize,
    acknowledge_calls: Vec<Vec<ReceiptHandle>>,
}

/// In-memory [`Transport`] used by tests and local demos.
#[derive(Debug)]
pub struct MemoryTransport {
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
    arrivals: Notify,
}

impl MemoryTransport {
    pub fn new(visibility_timeout: Duration) -> Self {
        MemoryTransport {
            visibility_timeout,
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the queue half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues a message and returns its generated id.
    pub fn send(&self, body: impl Into<String>) -> String {
        let id = {
            let mut state = self.state();
            state.next_id += 1;
            format!("msg-{}", state.next_id)
        };
        self.send_with_id(id.clone(), body);
        id
    }

    pub fn send_with_id(&self, id: impl Into<String>, body: impl Into<String>) {
        self.state().messages.push_back(StoredMessage {
            id: id.into(),
            body: body.into(),
            receive_count: 0,
            receipt_handle: None,
            invisible_until: None,
        });
        self.arrivals.notify_one();
    }

    /// Makes the next `count` fetch calls fail with a transport error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state().failing_fetches = count;
    }

    /// Makes the next `count` acknowledge calls fail as a whole.
    pub fn fail_next_acknowledges(&self, count: u32) {
        self.state().failing_acknowledges = count;
    }

    /// Rejects this receipt handle whenever it is acknowledged.
    pub fn reject_handle(&self, handle: impl Into<ReceiptHandle>) {
        self.state().rejected_handles.insert(handle.into());
    }

    /// Number of messages not yet acknowledged, visible or in flight.
    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    /// Receipt handles of every acknowledge call, in call order.
    pub fn acknowledge_calls(&self) -> Vec<Vec<ReceiptHandle>> {
        self.state().acknowledge_calls.clone()
    }

    fn take_visible(&self, max_messages: usize) -> (Vec<Message>, Option<Instant>) {
        let now = Instant::now();
        let visibility_timeout = self.visibility_timeout;
        let mut state = self.state();
        let mut delivered = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for stored in state.messages.iter_mut() {
            if !stored.is_visible(now) {
                if let Some(until) = stored.invisible_until {
                    next_visible = Some(next_visible.map_or(until, |t| t.min(until)));
                }
                continue;
            }
            if delivered.len() >= max_messages {
                continue;
            }
            stored.receive_count += 1;
            let handle = ReceiptHandle::new(format!("{}#{}", stored.id, stored.receive_count));
            stored.receipt_handle = Some(handle.clone());
            stored.invisible_until = Some(now + visibility_timeout);
            delivered.push(
                Message::new(stored.id.clone(), handle, stored.body.clone())
                    .with_receive_count(stored.receive_count),
            );
        }

        (delivered, next_visible)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(
        &self,
        max_messages: usize,
        wait_timeout: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        {
            let mut state = self.state();
            state.fetch_calls += 1;
            if state.failing_fetches > 0 {
                state.failing_fetches -= 1;
                return Err(TransportError::Receive {
                    queue: QUEUE_NAME.to_string(),
                    reason: "injected fetch failure".to_string(),
                });
            }
        }

        let deadline = Instant::now() + wait_timeout;
        loop {
            let (messages, next_visible) = self.take_visible(max_messages.max(1));
            if !messages.is_empty() || Instant::now() >= deadline {
                return Ok(messages);
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = self.arrivals.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, handles: &[ReceiptHandle]) -> Result<AckReport, TransportError> {
        let now = Instant::now();
        let mut state = self.state();
        state.acknowledge_calls.push(handles.to_vec());

        if state.failing_acknowledges > 0 {
            state.failing_acknowledges -= 1;
            return Err(TransportError::Acknowledge {
                queue: QUEUE_NAME.to_string(),
                count: handles.len(),
                reason: "injected acknowledge failure".to_string(),
            });
        }

        let mut report = AckReport::default();
        for handle in handles {
            if state.rejected_handles.contains(handle) {
                report.rejected.push(RejectedAck {
                    receipt_handle: handle.clone(),
                    code: "InjectedFailure".to_string(),
                    message: "handle rejected by test setup".to_string(),
                });
                continue;
            }

            let position = state.messages.iter().position(|stored| {
                stored.receipt_handle.as_ref() == Some(handle) && !stored.is_visible(now)
            });
            match position {
                Some(index) => {
                    state.messages.remove(index);
                    report.succeeded.push(handle.clone());
                }
                None => report.rejected.push(RejectedAck {
                    receipt_handle: handle.clone(),
                    code: "ReceiptHandleIsInvalid".to_string(),
                    message: "receipt handle is unknown or expired".to_string(),
                }),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fetch_returns_empty_after_wait_timeout() {
        let transport = MemoryTransport::new(Duration::from_secs(30));

        let started = Instant::now();
        let messages = transport.fetch(10, Duration::from_secs(2)).await.unwrap();

        assert!(messages.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_message_is_redelivered_with_new_handle() {
        let transport = MemoryTransport::new(Duration::from_secs(5));
        transport.send_with_id("m1", "hello");

        let first = transport.fetch(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(transport.fetch(10, Duration::ZERO).await.unwrap().is_empty());

        let second = transport.fetch(10, Duration::from_secs(10)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id(), "m1");
        assert_eq!(second[0].receive_count(), 2);
        assert_ne!(first[0].receipt_handle(), second[0].receipt_handle());

        let report = transport
            .acknowledge(&[first[0].receipt_handle().clone()])
            .await
            .unwrap();
        assert!(report.succeeded.is_empty());
        assert_eq!(report.rejected[0].code, "ReceiptHandleIsInvalid");

        let report = transport
            .acknowledge(&[second[0].receipt_handle().clone()])
            .await
            .unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert!(transport.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_wakes_up_when_a_message_arrives() {
        let transport = std::sync::Arc::new(MemoryTransport::new(Duration::from_secs(30)));
        let sender = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            sender.send("late");
        });

        let started = Instant::now();
        let messages = transport.fetch(10, Duration::from_secs(20)).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let transport = MemoryTransport::new(Duration::from_secs(30));
        transport.fail_next_fetches(1);
        transport.fail_next_acknowledges(1);

        assert!(transport.fetch(1, Duration::ZERO).await.is_err());
        assert!(transport.fetch(1, Duration::ZERO).await.is_ok());
        assert!(transport.acknowledge(&["x".into()]).await.is_err());
        assert!(transport.acknowledge(&["x".into()]).await.is_ok());
        assert_eq!(transport.fetch_calls(), 2);
        assert_eq!(transport.acknowledge_calls().len(), 2);
    }
}
