use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::acknowledgement::AckBatcher;
use crate::shutdown::StopSignal;
use crate::transport::{Message, Transport};

mod backoff;
mod config;
mod functions;

pub use backoff::Backoff;
pub use config::ReceiverConfig;
pub use functions::{MessageHandler, MessageHandlerFn, handler_fn};

/// Where the poll loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Fetching,
    Dispatching,
    /// Terminal: the loop has exited and the final ack flush is done.
    Stopped,
}

/// Counters reported when the poll loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub fetch_errors: u64,
}

/// Poll loop for a single queue: fetch, hand each message to the handler,
/// queue successful deliveries for acknowledgement.
///
/// Failed deliveries are never acknowledged or negatively acknowledged; the
/// queue's visibility timeout brings them back.
pub struct Dispatcher<T, H>
where
    T: Transport,
    H: MessageHandler,
{
    transport: Arc<T>,
    handler: H,
    batcher: AckBatcher<T>,
    config: ReceiverConfig,
    state: watch::Sender<DispatcherState>,
}

impl<T, H> Dispatcher<T, H>
where
    T: Transport,
    H: MessageHandler,
{
    pub fn new(transport: Arc<T>, handler: H, batcher: AckBatcher<T>, config: ReceiverConfig) -> Self {
        let (state, _) = watch::channel(DispatcherState::Idle);
        Dispatcher {
            transport,
            handler,
            batcher,
            config,
            state,
        }
    }

    /// Follows state changes of the loop.
    pub fn state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Runs the loop on its own task.
    pub fn spawn(self, stop: StopSignal) -> JoinHandle<ReceiverStats> {
        tokio::spawn(self.run(stop))
    }

    /// Runs until `stop` is raised.
    ///
    /// The signal is checked before every fetch; a fetch or handler call in
    /// progress is allowed to finish. Pending acknowledgements are flushed
    /// before the state turns [`DispatcherState::Stopped`].
    pub async fn run(self, stop: StopSignal) -> ReceiverStats {
        let age_trigger = self.batcher.spawn_age_trigger(stop.clone());
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        let mut stats = ReceiverStats::default();

        info!(
            max_number_of_messages = self.config.max_number_of_messages,
            wait_time_secs = self.config.wait_time.as_secs(),
            max_batch_size = self.batcher.settings().max_batch_size(),
            max_batch_age_ms = self.batcher.settings().max_batch_age().as_millis() as u64,
            "receiver started"
        );

        loop {
            self.state.send_replace(DispatcherState::Idle);
            if stop.is_stopped() {
                break;
            }

            self.state.send_replace(DispatcherState::Fetching);
            let messages = match self
                .transport
                .fetch(self.config.max_number_of_messages, self.config.wait_time)
                .await
            {
                Ok(messages) => {
                    backoff.reset();
                    messages
                }
                Err(e) => {
                    stats.fetch_errors += 1;
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "error receiving messages, backing off"
                    );
                    tokio::select! {
                        _ = stop.stopped() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            if messages.is_empty() {
                trace!("no messages received");
                continue;
            }

            self.state.send_replace(DispatcherState::Dispatching);
            stats.received += messages.len() as u64;
            for message in messages {
                if self.dispatch(message).await {
                    stats.succeeded += 1;
                } else {
                    stats.failed += 1;
                }
            }
        }

        info!("stop requested, flushing pending acknowledgements");
        if let Err(e) = age_trigger.await {
            error!(error = %e, "ack age trigger did not stop cleanly");
        }
        self.batcher.shutdown().await;
        self.state.send_replace(DispatcherState::Stopped);

        info!(
            received = stats.received,
            succeeded = stats.succeeded,
            failed = stats.failed,
            fetch_errors = stats.fetch_errors,
            "receiver stopped"
        );
        stats
    }

    /// Returns whether the handler accepted the message.
    async fn dispatch(&self, message: Message) -> bool {
        let message_id = message.id().to_string();
        let receipt_handle = message.receipt_handle().clone();
        debug!(
            message_id = %message_id,
            receive_count = message.receive_count(),
            "received message"
        );

        let handled = AssertUnwindSafe(async move { self.handler.process(message).await });
        match handled.catch_unwind().await
        {
            Ok(Ok(())) => {
                self.batcher.enqueue(receipt_handle);
                true
            }
            Ok(Err(failure)) => {
                warn!(
                    message_id = %message_id,
                    reason = %failure,
                    "error handling message, leaving it for redelivery"
                );
                false
            }
            Err(panic) => {
                error!(
                    message_id = %message_id,
                    panic = panic_message(panic.as_ref()),
                    "handler panicked, leaving message for redelivery"
                );
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::acknowledgement::{AckSettings, LoggingResultCallback};
    use crate::errors::HandlerFailure;
    use crate::shutdown::stop_signal;
    use crate::transport::MemoryTransport;

    fn config() -> ReceiverConfig {
        ReceiverConfig {
            max_number_of_messages: 10,
            wait_time: Duration::from_millis(100),
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(80),
        }
    }

    fn batcher(transport: &Arc<MemoryTransport>) -> AckBatcher<MemoryTransport> {
        AckBatcher::new(
            transport.clone(),
            AckSettings::new(10, Duration::from_millis(50)).unwrap(),
            Arc::new(LoggingResultCallback),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_counts_as_failure() {
        let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30)));
        transport.send_with_id("boom", "x");
        transport.send_with_id("fine", "y");

        let handler = handler_fn(
            |message: Message, _: ()| async move {
                if message.id() == "boom" {
                    panic!("handler bug");
                }
                Ok::<(), HandlerFailure>(())
            },
            (),
        );
        let dispatcher = Dispatcher::new(transport.clone(), handler, batcher(&transport), config());
        let (stop, signal) = stop_signal();
        let task = dispatcher.spawn(signal);

        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.stop();
        let stats = task.await.unwrap();

        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(transport.len(), 1);
    }

    /// Panics while building its future, before anything is polled.
    struct PanicsBeforePolling;

    impl MessageHandler for PanicsBeforePolling {
        fn process<'life0, 'async_trait>(
            &'life0 self,
            message: Message,
        ) -> Pin<Box<dyn Future<Output = Result<(), HandlerFailure>> + Send + 'async_trait>>
        where
            'life0: 'async_trait,
            Self: 'async_trait,
        {
            panic!("cannot handle {}", message.id());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handler_panicking_before_its_future_is_contained() {
        let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30)));
        transport.send_with_id("m1", "x");

        let dispatcher = Dispatcher::new(
            transport.clone(),
            PanicsBeforePolling,
            batcher(&transport),
            config(),
        );
        let (stop, signal) = stop_signal();
        let task = dispatcher.spawn(signal);

        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.stop();
        let stats = task.await.expect("poll loop survives the panic");

        assert_eq!(stats.received, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_back_off_and_recover() {
        let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30)));
        transport.fail_next_fetches(3);
        transport.send("payload");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = handler_fn(
            |message: Message, seen: Arc<Mutex<Vec<String>>>| async move {
                seen.lock().unwrap().push(message.body().to_string());
                Ok::<(), HandlerFailure>(())
            },
            seen.clone(),
        );
        let dispatcher = Dispatcher::new(transport.clone(), handler, batcher(&transport), config());
        let (stop, signal) = stop_signal();
        let task = dispatcher.spawn(signal);

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.stop();
        let stats = task.await.unwrap();

        assert_eq!(stats.fetch_errors, 3);
        assert_eq!(*seen.lock().unwrap(), vec!["payload".to_string()]);
        assert!(transport.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn state_ends_stopped() {
        let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30)));
        let handler = handler_fn(|_: Message, _: ()| async { Ok::<(), HandlerFailure>(()) }, ());
        let dispatcher = Dispatcher::new(transport.clone(), handler, batcher(&transport), config());
        let state = dispatcher.state();
        let (stop, signal) = stop_signal();
        let task = dispatcher.spawn(signal);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_ne!(*state.borrow(), DispatcherState::Stopped);

        stop.stop();
        task.await.unwrap();
        assert_eq!(*state.borrow(), DispatcherState::Stopped);
    }
}
