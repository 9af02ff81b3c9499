//! # AWS SQS Consumer
//!
//! An at-least-once AWS SQS consumption engine: a poll loop that hands every
//! delivered message to a handler and acknowledges successful deliveries in
//! batches, leaving failed ones for the queue to redeliver.
//!
//! ## Features
//!
//! - Asynchronous long polling with tokio and capped exponential backoff on fetch errors
//! - Trait-based handlers, or plain async functions with a shared resource
//! - Per-message failure isolation; handler panics count as failures
//! - Manual acknowledgement batched by size and age, never blocking the poll loop
//! - Per-handle acknowledgement results delivered to a result callback
//! - Cooperative shutdown that flushes pending acknowledgements
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rs_sqs_consumer::acknowledgement::{AckBatcher, LoggingResultCallback};
//! use rs_sqs_consumer::receiver::{Dispatcher, handler_fn};
//! use rs_sqs_consumer::transport::{Message, SqsTransport};
//! use rs_sqs_consumer::{client, config, errors::HandlerFailure, shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = config::load_config()?;
//!     let sqs_client = client::create_sqs_client(&config.client).await;
//!     let transport = Arc::new(SqsTransport::new(sqs_client, &config.queue_url));
//!
//!     let batcher = AckBatcher::new(transport.clone(), config.ack, Arc::new(LoggingResultCallback));
//!     let handler = handler_fn(
//!         |message: Message, shared: String| async move {
//!             println!("Processing message: {} with shared: {}", message.body(), shared);
//!             Ok::<(), HandlerFailure>(())
//!         },
//!         "shared state".to_string(),
//!     );
//!
//!     let (stop, signal) = shutdown::stop_signal();
//!     let receiver = Dispatcher::new(transport, handler, batcher, config.receiver).spawn(signal);
//!
//!     tokio::signal::ctrl_c().await?;
//!     stop.stop();
//!     receiver.await?;
//!     Ok(())
//! }
//! ```

pub mod acknowledgement;
pub mod client;
pub mod config;
pub mod errors;
pub mod receiver;
pub mod shutdown;
pub mod transport;
