use crate::errors::HandlerFailure;
use crate::transport::Message;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for implementing message handlers.
///
/// A handler is called once per delivery. Returning `Ok` gets the delivery
/// acknowledged; returning `Err` (or panicking) leaves it on the queue so it
/// is redelivered after its visibility timeout. Deliveries can repeat, so
/// handlers must tolerate seeing the same message id more than once.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Processes one delivered message.
    ///
    /// # Arguments
    ///
    /// * `message` - The delivered message, including its body and id
    async fn process(&self, message: Message) -> Result<(), HandlerFailure>;
}

#[async_trait]
impl<F, Fut, TShared> MessageHandler for MessageHandlerFn<F, Fut, TShared>
where
    F: Fn(Message, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerFailure>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn process(&self, message: Message) -> Result<(), HandlerFailure> {
        (self.rv_fn)(message, self.shared_resources.clone()).await
    }
}

/// Adapts an async function plus a shared resource into a [`MessageHandler`].
///
/// # Type Parameters
///
/// * `RFn` - The message handler function type
/// * `Fut` - The future returned by the handler function
/// * `TShared` - The type of shared resources passed to the handler
pub struct MessageHandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(Message, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerFailure>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    rv_fn: RFn,
    shared_resources: TShared,
    _future: PhantomData<fn() -> Fut>,
}

impl<RFn, Fut, TShared> MessageHandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(Message, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerFailure>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    /// Creates a new handler from a function.
    ///
    /// # Arguments
    ///
    /// * `rv_fn` - The message handler function
    /// * `shared_resources` - Resources cloned into every handler call
    pub fn new(rv_fn: RFn, shared_resources: TShared) -> Self {
        MessageHandlerFn {
            rv_fn,
            shared_resources,
            _future: PhantomData,
        }
    }
}

/// Shorthand for [`MessageHandlerFn::new`].
///
/// ```rust
/// use rs_sqs_consumer::errors::HandlerFailure;
/// use rs_sqs_consumer::receiver::handler_fn;
/// use rs_sqs_consumer::transport::Message;
///
/// let handler = handler_fn(
///     |message: Message, prefix: String| async move {
///         println!("{prefix}: {}", message.body());
///         Ok::<(), HandlerFailure>(())
///     },
///     "received".to_string(),
/// );
/// # let _ = handler;
/// ```
pub fn handler_fn<RFn, Fut, TShared>(
    rv_fn: RFn,
    shared_resources: TShared,
) -> MessageHandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(Message, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerFailure>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    MessageHandlerFn::new(rv_fn, shared_resources)
}
