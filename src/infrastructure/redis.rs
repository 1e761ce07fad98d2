use crate::domain::connection::{BrokerAddress, ConnectionState, InboundMessage};
use crate::domain::ports::{
    BrokerConnector, CommandConnection, CommandConnectionBox, Connection, SubscriptionConnection,
    SubscriptionConnectionBox,
};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, AsyncConnectionConfig, RedisError};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest wait for a reply on the command connection.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens sessions against a Redis server.
///
/// Each call builds an independent client so the command and subscription
/// sessions never share a socket.
#[derive(Debug, Clone, Copy)]
pub struct RedisConnector {
    response_timeout: Duration,
}

impl RedisConnector {
    pub fn new() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `err` means the session itself is gone, as opposed to a rejected
/// command on a healthy session.
fn is_fatal(err: &RedisError) -> bool {
    err.is_connection_dropped() || err.is_io_error() || err.is_timeout()
}

#[async_trait]
impl BrokerConnector for RedisConnector {
    async fn open_command(&self, address: &BrokerAddress) -> Result<CommandConnectionBox> {
        let client = redis::Client::open(address.as_str())?;
        let config = AsyncConnectionConfig::new().set_response_timeout(self.response_timeout);
        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        debug!(broker = %address, "Command connection opened");
        Ok(Box::new(RedisCommandConnection {
            connection: Some(connection),
        }))
    }

    async fn open_subscription(
        &self,
        address: &BrokerAddress,
    ) -> Result<SubscriptionConnectionBox> {
        let client = redis::Client::open(address.as_str())?;
        let pubsub = client.get_async_pubsub().await?;
        debug!(broker = %address, "Subscription connection opened");
        Ok(Box::new(RedisSubscriptionConnection {
            pubsub: Some(pubsub),
        }))
    }
}

/// Dropping the multiplexed connection closes its socket, so `None` is the
/// closed state.
pub struct RedisCommandConnection {
    connection: Option<MultiplexedConnection>,
}

#[async_trait]
impl Connection for RedisCommandConnection {
    fn state(&self) -> ConnectionState {
        if self.connection.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connection.take();
        Ok(())
    }
}

#[async_trait]
impl CommandConnection for RedisCommandConnection {
    async fn publish(&mut self, channel: &str, payload: &str) -> Result<()> {
        let connection = self.connection.as_mut().ok_or(BridgeError::NotOpen)?;
        let published: redis::RedisResult<i64> = connection.publish(channel, payload).await;
        match published {
            Ok(receivers) => {
                debug!(channel, receivers, "Message published");
                Ok(())
            }
            Err(err) => {
                if is_fatal(&err) {
                    warn!(error = %err, "Command connection lost");
                    self.connection = None;
                }
                Err(err.into())
            }
        }
    }
}

pub struct RedisSubscriptionConnection {
    pubsub: Option<PubSub>,
}

impl RedisSubscriptionConnection {
    /// Drops the session when `result` shows it is gone.
    fn settle(&mut self, result: redis::RedisResult<()>) -> Result<()> {
        result.map_err(|err| {
            if is_fatal(&err) {
                warn!(error = %err, "Subscription connection lost");
                self.pubsub = None;
            }
            err.into()
        })
    }
}

#[async_trait]
impl Connection for RedisSubscriptionConnection {
    fn state(&self) -> ConnectionState {
        if self.pubsub.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.pubsub.take();
        Ok(())
    }
}

#[async_trait]
impl SubscriptionConnection for RedisSubscriptionConnection {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let pubsub = self.pubsub.as_mut().ok_or(BridgeError::NotOpen)?;
        let subscribed = pubsub.subscribe(channel).await;
        self.settle(subscribed)
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        let pubsub = self.pubsub.as_mut().ok_or(BridgeError::NotOpen)?;
        let unsubscribed = pubsub.unsubscribe(channel).await;
        self.settle(unsubscribed)
    }

    async fn next_message(&mut self) -> Option<InboundMessage> {
        let pubsub = self.pubsub.as_mut()?;
        let next = {
            let stream = pubsub.on_message();
            tokio::pin!(stream);
            stream.next().await
        };
        match next {
            Some(message) => Some(InboundMessage::new(
                message.get_channel_name(),
                message.get_payload_bytes(),
            )),
            None => {
                // The server closed the session.
                self.pubsub = None;
                None
            }
        }
    }
}
