use super::connection::{BrokerAddress, ConnectionState, InboundMessage};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Behaviour shared by every broker session.
#[async_trait]
pub trait Connection: Send {
    fn state(&self) -> ConnectionState;

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Ends the session. Closing a connection that is already closed is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Session used to issue commands, publishing in particular.
#[async_trait]
pub trait CommandConnection: Connection {
    async fn publish(&mut self, channel: &str, payload: &str) -> Result<()>;
}

/// Session dedicated to receiving messages.
///
/// Kept separate from the command session because a subscribed connection
/// cannot issue regular commands on most brokers.
#[async_trait]
pub trait SubscriptionConnection: Connection {
    async fn subscribe(&mut self, channel: &str) -> Result<()>;
    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;

    /// Waits for the next message. Returns `None` once the session is gone.
    async fn next_message(&mut self) -> Option<InboundMessage>;
}

pub type CommandConnectionBox = Box<dyn CommandConnection>;
pub type SubscriptionConnectionBox = Box<dyn SubscriptionConnection>;

/// Opens broker sessions.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn open_command(&self, address: &BrokerAddress) -> Result<CommandConnectionBox>;
    async fn open_subscription(
        &self,
        address: &BrokerAddress,
    ) -> Result<SubscriptionConnectionBox>;
}

pub type BrokerConnectorRef = Arc<dyn BrokerConnector>;

/// Business logic applied to each decoded inbound event.
///
/// Returning `Ok(None)` means the event needs no outbound message.
pub trait EventHandler: Send + Sync {
    type Input: DeserializeOwned;
    type Output: Serialize + Send + 'static;

    fn handle(&self, event: Self::Input) -> Result<Option<Self::Output>>;

    /// Last touch before encoding, applied only once the command connection
    /// is known to be open. Publish-time fields belong here.
    fn stamp(&self, output: Self::Output) -> Self::Output {
        output
    }
}
