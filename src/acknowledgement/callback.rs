use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::SystemTime;

use tracing::{error, info};

use super::FlushResult;
use crate::errors::AckFailure;
use crate::transport::ReceiptHandle;

/// Observer of acknowledgement outcomes, called once per flush attempt.
///
/// Implementations must not panic; if one does, the panic is caught and
/// logged and the batcher carries on.
pub trait ResultCallback: Send + Sync {
    fn on_success(&self, handles: &[ReceiptHandle]);

    fn on_failure(&self, handles: &[ReceiptHandle], cause: &AckFailure);
}

/// Logs every acknowledgement outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingResultCallback;

impl ResultCallback for LoggingResultCallback {
    fn on_success(&self, handles: &[ReceiptHandle]) {
        info!(count = handles.len(), at = ?SystemTime::now(), "ack with success");
    }

    fn on_failure(&self, handles: &[ReceiptHandle], cause: &AckFailure) {
        error!(count = handles.len(), error = %cause, "ack with fail");
        if let AckFailure::Rejected(rejected) = cause {
            for entry in rejected {
                error!(
                    receipt_handle = %entry.receipt_handle,
                    code = %entry.code,
                    message = %entry.message,
                    "receipt handle rejected"
                );
            }
        }
    }
}

/// Hands a flush result to the callback. A partial failure reports the
/// acknowledged subset through `on_success` first.
///
/// Each call is isolated, so a panicking `on_success` still lets
/// `on_failure` see the handles that were not acknowledged.
pub(crate) fn notify(callback: &dyn ResultCallback, result: &FlushResult) {
    match result {
        FlushResult::Success { batch } => {
            let handles = batch.receipt_handles();
            guarded("on_success", handles.len(), || callback.on_success(&handles));
        }
        FlushResult::Failure {
            succeeded,
            failed,
            cause,
            ..
        } => {
            if !succeeded.is_empty() {
                guarded("on_success", succeeded.len(), || callback.on_success(succeeded));
            }
            guarded("on_failure", failed.len(), || callback.on_failure(failed, cause));
        }
    }
}

fn guarded(method: &'static str, handles: usize, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        error!(method, handles, "result callback panicked; outcome dropped from observers");
    }
}
