//! Graceful shutdown coordination via `CancellationToken`.

use super::channels::DualChannelManager;
use super::router::EventRouter;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of the shutdown sequence. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShutdownPhase {
    Running = 0,
    Unsubscribing = 1,
    ClosingConnections = 2,
    Terminated = 3,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Unsubscribing,
            2 => Self::ClosingConnections,
            _ => Self::Terminated,
        }
    }
}

/// Turns termination requests into one orderly unwind of the bridge.
///
/// Any number of callers may [`trigger`](Self::trigger) it; the unwind itself
/// runs at most once.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    phase: AtomicU8,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
        }
    }

    /// Get a clone of the cancellation token observed by the dispatch loop.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutting down...");
        }
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Claims the unwind. Exactly one caller ever gets `true`.
    pub fn begin(&self) -> bool {
        self.phase
            .compare_exchange(
                ShutdownPhase::Running as u8,
                ShutdownPhase::Unsubscribing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn advance(&self, phase: ShutdownPhase) {
        debug!(?phase, "Shutdown phase");
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Unsubscribe, close the subscription connection, then the command
    /// connection.
    ///
    /// Cleanup errors are logged and never stop the sequence. Returns `false`
    /// without doing anything if the unwind already ran or is running.
    pub async fn unwind(&self, router: &mut EventRouter, channels: &mut DualChannelManager) -> bool {
        if !self.begin() {
            debug!("Shutdown already in progress");
            return false;
        }
        self.token.cancel();

        for err in router.deactivate(channels).await {
            warn!(error = %err, "Shutdown error");
        }

        self.advance(ShutdownPhase::ClosingConnections);
        for err in channels.close_all().await {
            warn!(error = %err, "Shutdown error");
        }

        self.advance(ShutdownPhase::Terminated);
        info!("Shutdown complete");
        true
    }

    /// Finishes shutdown when no connections exist to unwind.
    pub fn terminate_idle(&self) -> bool {
        if !self.begin() {
            return false;
        }
        self.token.cancel();
        self.advance(ShutdownPhase::Terminated);
        info!("Shutdown complete");
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
