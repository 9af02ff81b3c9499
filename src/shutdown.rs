//! Cooperative stop signal shared by the poll loop and the age trigger.

use std::sync::Arc;

use tokio::sync::watch;

/// Creates a connected stop handle and signal.
pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Raises the stop signal. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes the stop signal at well-defined checkpoints.
///
/// Raising the signal never interrupts work in flight; the loops look at it
/// between units of work.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is raised. If every handle is dropped without
    /// stopping, this never resolves.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|stopped| *stopped).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
