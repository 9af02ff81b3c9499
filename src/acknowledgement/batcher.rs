use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, trace, warn};

use super::callback::notify;
use super::{AckBatch, AckRequest, AckSettings, FlushResult, FlushTrigger, ResultCallback};
use crate::shutdown::StopSignal;
use crate::transport::{ReceiptHandle, Transport};

/// Collects receipt handles and acknowledges them in batches.
///
/// Cloning is cheap and every clone feeds the same pending batch. The lock
/// around the batch is only held to push a handle or swap the batch out;
/// the acknowledgement call itself runs on the removed batch without it.
pub struct AckBatcher<T: Transport> {
    shared: Arc<BatcherShared<T>>,
}

struct BatcherShared<T: Transport> {
    transport: Arc<T>,
    callback: Arc<dyn ResultCallback>,
    settings: AckSettings,
    runtime: Handle,
    pending: Mutex<Vec<AckRequest>>,
    in_flight: Mutex<JoinSet<()>>,
}

impl<T: Transport> Clone for AckBatcher<T> {
    fn clone(&self) -> Self {
        AckBatcher {
            shared: self.shared.clone(),
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> AckBatcher<T> {
    /// Creates a batcher bound to the current Tokio runtime.
    ///
    /// Background flushes always run on that runtime, so [`enqueue`] may be
    /// called from any thread afterwards.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    ///
    /// [`enqueue`]: AckBatcher::enqueue
    pub fn new(
        transport: Arc<T>,
        settings: AckSettings,
        callback: Arc<dyn ResultCallback>,
    ) -> Self {
        AckBatcher {
            shared: Arc::new(BatcherShared {
                transport,
                callback,
                settings,
                runtime: Handle::current(),
                pending: Mutex::new(Vec::new()),
                in_flight: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> &AckSettings {
        &self.shared.settings
    }

    /// Number of handles waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Adds a handle to the pending batch. Reaching `max_batch_size` starts a
    /// flush in the background; the caller never waits for it.
    pub fn enqueue(&self, receipt_handle: ReceiptHandle) {
        let full = {
            let mut pending = lock(&self.shared.pending);
            pending.push(AckRequest::new(receipt_handle));
            trace!(pending = pending.len(), "receipt handle added to ack batch");
            if pending.len() >= self.shared.settings.max_batch_size() {
                Some(mem::take(&mut *pending))
            } else {
                None
            }
        };

        if let Some(requests) = full {
            self.spawn_flush(AckBatch::from(requests), FlushTrigger::Size);
        }
    }

    /// Acknowledges whatever is pending and waits for the outcome.
    ///
    /// Returns `None` without touching the transport or the callback when
    /// nothing is pending.
    pub async fn flush(&self) -> Option<FlushResult> {
        let batch = self.take_pending()?;
        Some(self.shared.submit(batch, FlushTrigger::Manual).await)
    }

    /// Watches the age of the pending batch until `stop` is raised.
    pub fn spawn_age_trigger(&self, stop: StopSignal) -> JoinHandle<()> {
        let batcher = self.clone();
        self.shared.runtime.spawn(async move {
            let mut ticker = interval(batcher.shared.settings.flush_tick());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            debug!(
                max_batch_age_ms = batcher.shared.settings.max_batch_age().as_millis() as u64,
                tick_ms = batcher.shared.settings.flush_tick().as_millis() as u64,
                "ack age trigger started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = stop.stopped() => break,
                    _ = ticker.tick() => {}
                }
                if stop.is_stopped() {
                    break;
                }
                if let Some(batch) = batcher.take_expired() {
                    batcher.spawn_flush(batch, FlushTrigger::Age);
                }
            }

            debug!("ack age trigger stopped");
        })
    }

    /// Waits for background flushes, then flushes anything still pending.
    /// Returns the result of that final flush, if there was one.
    pub async fn shutdown(&self) -> Option<FlushResult> {
        self.drain_in_flight().await;

        let final_flush = match self.take_pending() {
            Some(batch) => Some(self.shared.submit(batch, FlushTrigger::Shutdown).await),
            None => None,
        };

        info!(
            final_batch = final_flush.as_ref().map_or(0, |r| r.batch().len()),
            "ack batcher shut down"
        );
        final_flush
    }

    fn take_pending(&self) -> Option<AckBatch> {
        let mut pending = lock(&self.shared.pending);
        if pending.is_empty() {
            return None;
        }
        Some(AckBatch::from(mem::take(&mut *pending)))
    }

    fn take_expired(&self) -> Option<AckBatch> {
        let mut pending = lock(&self.shared.pending);
        let oldest = pending.first()?.enqueued_at();
        if oldest.elapsed() < self.shared.settings.max_batch_age() {
            return None;
        }
        Some(AckBatch::from(mem::take(&mut *pending)))
    }

    fn spawn_flush(&self, batch: AckBatch, trigger: FlushTrigger) {
        let shared = self.shared.clone();
        let mut in_flight = lock(&self.shared.in_flight);
        while let Some(joined) = in_flight.try_join_next() {
            log_join_error(joined);
        }
        in_flight.spawn_on(
            async move {
                shared.submit(batch, trigger).await;
            },
            &self.shared.runtime,
        );
    }

    async fn drain_in_flight(&self) {
        loop {
            let mut in_flight = mem::take(&mut *lock(&self.shared.in_flight));
            if in_flight.is_empty() {
                break;
            }
            while let Some(joined) = in_flight.join_next().await {
                log_join_error(joined);
            }
        }
    }
}

impl<T: Transport> BatcherShared<T> {
    async fn submit(&self, batch: AckBatch, trigger: FlushTrigger) -> FlushResult {
        let handles = batch.receipt_handles();
        debug!(batch_size = handles.len(), %trigger, "flushing ack batch");

        let outcome = self.transport.acknowledge(&handles).await;
        let result = FlushResult::from_outcome(batch, outcome);

        match &result {
            FlushResult::Success { batch } => {
                debug!(batch_size = batch.len(), %trigger, "ack batch flushed");
            }
            FlushResult::Failure {
                succeeded,
                failed,
                cause,
                ..
            } => {
                warn!(
                    succeeded = succeeded.len(),
                    failed = failed.len(),
                    %trigger,
                    error = %cause,
                    "ack batch completed with failures; failed messages will be redelivered"
                );
            }
        }

        notify(self.callback.as_ref(), &result);
        result
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "ack flush task did not complete");
    }
}
