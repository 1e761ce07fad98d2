use super::channels::DualChannelManager;
use super::router::{EventRouter, LoopExit};
use super::shutdown::ShutdownCoordinator;
use super::supervisor::ConnectionSupervisor;
use crate::domain::connection::BrokerAddress;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The main entry point of the bridge service.
///
/// `EventBridge` owns the supervisor and the router and drives them until
/// shutdown: establish both connections, subscribe, dispatch. When the
/// subscription connection is lost it tears both connections down and starts
/// over.
pub struct EventBridge {
    address: BrokerAddress,
    supervisor: ConnectionSupervisor,
    router: EventRouter,
    shutdown: Arc<ShutdownCoordinator>,
}

impl EventBridge {
    /// Creates a new `EventBridge`.
    ///
    /// # Arguments
    ///
    /// * `address` - Where the broker lives.
    /// * `supervisor` - Opens the connection pair.
    /// * `router` - Routes with all handlers already registered.
    /// * `shutdown` - Coordinator shared with the signal listener.
    pub fn new(
        address: BrokerAddress,
        supervisor: ConnectionSupervisor,
        router: EventRouter,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            address,
            supervisor,
            router,
            shutdown,
        }
    }

    /// Runs until shutdown is requested and the unwind has completed.
    pub async fn run(mut self) {
        let token = self.shutdown.token();

        loop {
            let mut channels = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Shutdown requested before broker connections were established");
                    self.shutdown.terminate_idle();
                    return;
                }
                channels = self.supervisor.establish(&self.address) => channels,
            };

            if let Err(err) = self.router.activate(&mut channels).await {
                warn!(error = %err, "Subscribing failed, reconnecting");
                self.teardown(&mut channels).await;
                if !self.pause(&token).await {
                    self.shutdown.terminate_idle();
                    return;
                }
                continue;
            }

            info!(output = self.router.output_channel(), "Service started");

            match self.router.dispatch_loop(&mut channels, &token).await {
                LoopExit::Shutdown => {
                    self.shutdown.unwind(&mut self.router, &mut channels).await;
                    return;
                }
                LoopExit::ConnectionLost => {
                    warn!("Broker connection lost, reconnecting");
                    self.teardown(&mut channels).await;
                }
            }
        }
    }

    async fn teardown(&mut self, channels: &mut DualChannelManager) {
        let mut errors = self.router.deactivate(channels).await;
        errors.extend(channels.close_all().await);
        for err in errors {
            warn!(error = %err, "Error while tearing down connections");
        }
    }

    /// Waits one retry interval. Returns `false` if shutdown came first.
    async fn pause(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.supervisor.retry_interval()) => true,
        }
    }
}
