use crate::application::shutdown::ShutdownCoordinator;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Forwards every SIGINT/SIGTERM to the coordinator until the process exits.
pub fn spawn_listener(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = listen(&coordinator).await {
            error!(error = %err, "Failed to listen for termination signals");
        }
    })
}

#[cfg(unix)]
async fn listen(coordinator: &ShutdownCoordinator) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        let name = tokio::select! {
            Some(()) = interrupt.recv() => "SIGINT",
            Some(()) = terminate.recv() => "SIGTERM",
            else => return Ok(()),
        };
        info!(signal = name, "Termination signal received");
        coordinator.trigger();
    }
}

#[cfg(not(unix))]
async fn listen(coordinator: &ShutdownCoordinator) -> io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        info!(signal = "ctrl-c", "Termination signal received");
        coordinator.trigger();
    }
}
