//! Queue listener: logs every received message and acknowledges it.
//!
//! Configuration comes from the environment (see `rs_sqs_consumer::config`);
//! set `RUST_LOG` to control log output. Ctrl-C stops polling and flushes
//! pending acknowledgements before exiting.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use rs_sqs_consumer::acknowledgement::{AckBatcher, LoggingResultCallback};
use rs_sqs_consumer::client::create_sqs_client;
use rs_sqs_consumer::config::load_config;
use rs_sqs_consumer::errors::{HandlerFailure, SqsConsumerError};
use rs_sqs_consumer::receiver::{Dispatcher, handler_fn};
use rs_sqs_consumer::shutdown::stop_signal;
use rs_sqs_consumer::transport::{Message, SqsTransport};

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().compact())
        .init();
}

async fn log_message(message: Message, queue_url: Arc<str>) -> Result<(), HandlerFailure> {
    info!(
        queue = %queue_url,
        message_id = message.id(),
        receive_count = message.receive_count(),
        body = message.body(),
        "Received message"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), SqsConsumerError> {
    init_logging();

    let config = load_config()?;
    info!(queue = %config.queue_url, endpoint = ?config.client.endpoint_url, "starting consumer");

    let sqs_client = create_sqs_client(&config.client).await;
    let transport = Arc::new(SqsTransport::new(sqs_client, &config.queue_url));
    let batcher = AckBatcher::new(transport.clone(), config.ack, Arc::new(LoggingResultCallback));
    let handler = handler_fn(log_message, Arc::<str>::from(transport.queue_url()));

    let (stop, signal) = stop_signal();
    let receiver = Dispatcher::new(transport, handler, batcher, config.receiver).spawn(signal);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c; stopping");
    }
    info!("ctrl-c: draining");
    stop.stop();

    let stats = receiver.await?;
    info!(?stats, "consumer stopped");
    Ok(())
}
