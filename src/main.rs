use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payment_bridge::application::engine::EventBridge;
use payment_bridge::application::payment::PaymentHandler;
use payment_bridge::application::router::EventRouter;
use payment_bridge::application::shutdown::ShutdownCoordinator;
use payment_bridge::application::supervisor::ConnectionSupervisor;
use payment_bridge::domain::ports::BrokerConnectorRef;
use payment_bridge::infrastructure::in_memory::InMemoryBroker;
use payment_bridge::infrastructure::redis::RedisConnector;
use payment_bridge::interfaces::cli::{BrokerKind, Cli};
use payment_bridge::interfaces::signals;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let connector: BrokerConnectorRef = match cli.broker {
        BrokerKind::Redis => Arc::new(RedisConnector::new()),
        BrokerKind::Memory => Arc::new(InMemoryBroker::new()),
    };

    let mut router = EventRouter::new(cli.output_channel.clone());
    router
        .subscribe(cli.input_channel.clone(), PaymentHandler::new())
        .into_diagnostic()?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    signals::spawn_listener(shutdown.clone());

    let address = cli.address();
    info!(broker = %address, backend = ?cli.broker, input = %cli.input_channel, "Starting payment bridge");

    let supervisor = ConnectionSupervisor::new(connector).with_retry_interval(cli.retry_interval());
    EventBridge::new(address, supervisor, router, shutdown)
        .run()
        .await;

    // Cleanup problems were logged during the unwind; shutdown itself succeeds.
    Ok(())
}
