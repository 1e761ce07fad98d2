use super::channels::{DualChannelManager, close_quietly};
use crate::domain::connection::BrokerAddress;
use crate::domain::ports::{BrokerConnectorRef, Connection};
use crate::error::{BridgeError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between establishment attempts. Fixed, no growth.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Where the supervisor is in establishing the connection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No connection; `attempts` is the number of attempts made so far.
    Disconnected { attempts: u32 },
    Connecting { attempt: u32 },
    Open { attempt: u32 },
    Failed { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Attempt,
    Opened,
    OpenFailed,
    BackoffElapsed,
}

impl SupervisorState {
    pub const INITIAL: Self = Self::Disconnected { attempts: 0 };

    pub fn attempt(&self) -> u32 {
        match *self {
            Self::Disconnected { attempts } => attempts,
            Self::Connecting { attempt } | Self::Open { attempt } | Self::Failed { attempt } => {
                attempt
            }
        }
    }
}

/// Pure transition function of the establishment state machine.
///
/// Events that do not apply to the current state leave it unchanged.
pub fn transition(state: SupervisorState, event: SupervisorEvent) -> SupervisorState {
    use SupervisorEvent as E;
    use SupervisorState as S;

    match (state, event) {
        (S::Disconnected { attempts }, E::Attempt) => S::Connecting {
            attempt: attempts + 1,
        },
        (S::Connecting { attempt }, E::Opened) => S::Open { attempt },
        (S::Connecting { attempt }, E::OpenFailed) => S::Failed { attempt },
        (S::Failed { attempt }, E::BackoffElapsed) => S::Disconnected { attempts: attempt },
        (state, _) => state,
    }
}

/// Establishes the command/subscription connection pair, retrying forever.
pub struct ConnectionSupervisor {
    connector: BrokerConnectorRef,
    retry_interval: Duration,
}

impl ConnectionSupervisor {
    pub fn new(connector: BrokerConnectorRef) -> Self {
        Self {
            connector,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Returns only once both connections are open.
    ///
    /// Failures are logged and retried after the fixed interval; there is no
    /// attempt limit. Drop the future to stop trying.
    pub async fn establish(&self, address: &BrokerAddress) -> DualChannelManager {
        let mut state = SupervisorState::INITIAL;
        loop {
            state = transition(state, SupervisorEvent::Attempt);
            debug!(attempt = state.attempt(), broker = %address, "Connecting to broker");

            match self.open_pair(address).await {
                Ok(channels) => {
                    state = transition(state, SupervisorEvent::Opened);
                    info!(attempt = state.attempt(), broker = %address, "Broker connections established");
                    return channels;
                }
                Err(err) => {
                    state = transition(state, SupervisorEvent::OpenFailed);
                    warn!(
                        attempt = state.attempt(),
                        error = %err,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        "Broker connection failed, retrying"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                    state = transition(state, SupervisorEvent::BackoffElapsed);
                }
            }
        }
    }

    /// One attempt. Whatever opened is closed again on failure.
    async fn open_pair(&self, address: &BrokerAddress) -> Result<DualChannelManager> {
        let mut command = self.connector.open_command(address).await?;

        let mut subscription = match self.connector.open_subscription(address).await {
            Ok(subscription) => subscription,
            Err(err) => {
                close_quietly(command.as_mut(), "command").await;
                return Err(err);
            }
        };

        // Either session may have failed while the other was being opened.
        if !command.is_open() || !subscription.is_open() {
            close_quietly(subscription.as_mut(), "subscription").await;
            close_quietly(command.as_mut(), "command").await;
            return Err(BridgeError::ConnectionError(
                "connection lost before both sessions were confirmed open".to_string(),
            ));
        }

        Ok(DualChannelManager::new(command, subscription))
    }
}
