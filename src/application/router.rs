use super::channels::DualChannelManager;
use crate::domain::connection::InboundMessage;
use crate::domain::ports::{Connection, EventHandler};
use crate::error::{BridgeError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stamps and encodes a handler's output. Run only when publishing.
type Outbound = Box<dyn FnOnce() -> Result<String> + Send>;

/// Decodes a raw payload and runs the handler.
type Route = Box<dyn Fn(&[u8]) -> Result<Option<Outbound>> + Send + Sync>;

/// What happened to a single inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published,
    /// The handler had nothing to publish.
    NoOutput,
    /// No handler is registered for the channel.
    Unrouted,
    DecodeFailed,
    HandlerFailed,
    /// The command connection was not open; the event was dropped.
    Dropped,
    PublishFailed,
}

/// Why the dispatch loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    ConnectionLost,
}

/// Routes inbound messages to handlers and publishes their results.
///
/// Holds one handler per channel and tracks which channels are currently
/// subscribed on the subscription connection.
pub struct EventRouter {
    output_channel: String,
    routes: BTreeMap<String, Route>,
    active: BTreeSet<String>,
}

impl EventRouter {
    pub fn new(output_channel: impl Into<String>) -> Self {
        Self {
            output_channel: output_channel.into(),
            routes: BTreeMap::new(),
            active: BTreeSet::new(),
        }
    }

    pub fn output_channel(&self) -> &str {
        &self.output_channel
    }

    /// Registers the handler for `channel`. A channel takes exactly one handler.
    pub fn subscribe<H>(&mut self, channel: impl Into<String>, handler: H) -> Result<()>
    where
        H: EventHandler + 'static,
    {
        let channel = channel.into();
        if self.routes.contains_key(&channel) {
            return Err(BridgeError::DuplicateSubscription(channel));
        }

        let handler = Arc::new(handler);
        let route: Route = Box::new(move |payload: &[u8]| -> Result<Option<Outbound>> {
            let event =
                serde_json::from_slice::<H::Input>(payload).map_err(BridgeError::DecodeError)?;
            let Some(output) = handler.handle(event)? else {
                return Ok(None);
            };
            let handler = Arc::clone(&handler);
            let outbound: Outbound = Box::new(move || {
                serde_json::to_string(&handler.stamp(output)).map_err(BridgeError::EncodeError)
            });
            Ok(Some(outbound))
        });
        self.routes.insert(channel, route);
        Ok(())
    }

    pub fn is_active(&self, channel: &str) -> bool {
        self.active.contains(channel)
    }

    /// Subscribes every registered channel that is not subscribed yet.
    pub async fn activate(&mut self, channels: &mut DualChannelManager) -> Result<()> {
        let subscription = channels.subscription_connection();
        if !subscription.is_open() {
            return Err(BridgeError::NotOpen);
        }

        let pending: Vec<String> = self
            .routes
            .keys()
            .filter(|channel| !self.active.contains(*channel))
            .cloned()
            .collect();
        for channel in pending {
            subscription.subscribe(&channel).await?;
            info!(channel = %channel, "Subscribed");
            self.active.insert(channel);
        }
        Ok(())
    }

    /// Unsubscribes every active channel.
    ///
    /// A closed subscription connection is tolerated; its subscriptions are
    /// simply forgotten. Errors are returned for the caller to report.
    pub async fn deactivate(&mut self, channels: &mut DualChannelManager) -> Vec<BridgeError> {
        let subscription = channels.subscription_connection();
        let mut errors = Vec::new();
        for channel in std::mem::take(&mut self.active) {
            if !subscription.is_open() {
                debug!(channel = %channel, "Subscription connection already closed");
                continue;
            }
            match subscription.unsubscribe(&channel).await {
                Ok(()) => info!(channel = %channel, "Unsubscribed"),
                Err(err) => {
                    warn!(channel = %channel, error = %err, "Failed to unsubscribe");
                    errors.push(BridgeError::CleanupError(format!(
                        "unsubscribe from {channel}: {err}"
                    )));
                }
            }
        }
        errors
    }

    /// Receives and dispatches messages, one at a time, in delivery order.
    ///
    /// Returns when `shutdown` is cancelled, when the subscription stream
    /// ends, or when the command connection is found closed after a dispatch
    /// step. Cancellation is observed between messages; a dispatch already
    /// under way finishes first.
    pub async fn dispatch_loop(
        &self,
        channels: &mut DualChannelManager,
        shutdown: &CancellationToken,
    ) -> LoopExit {
        loop {
            if !channels.command_connection().is_open() {
                warn!("Command connection lost");
                return LoopExit::ConnectionLost;
            }

            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return LoopExit::Shutdown,
                message = channels.subscription_connection().next_message() => message,
            };

            match message {
                Some(message) => {
                    self.dispatch(channels, message).await;
                }
                None => {
                    warn!("Subscription connection lost");
                    return LoopExit::ConnectionLost;
                }
            }
        }
    }

    /// Handles one inbound message. Never fails; every problem is logged and
    /// the message discarded.
    pub async fn dispatch(
        &self,
        channels: &mut DualChannelManager,
        message: InboundMessage,
    ) -> DispatchOutcome {
        let Some(route) = self.routes.get(message.channel()) else {
            debug!(channel = message.channel(), "No handler for channel, ignoring message");
            return DispatchOutcome::Unrouted;
        };

        let outbound = match route(message.payload()) {
            Ok(Some(outbound)) => outbound,
            Ok(None) => {
                debug!(channel = message.channel(), "Handler produced no outbound event");
                return DispatchOutcome::NoOutput;
            }
            Err(BridgeError::DecodeError(err)) => {
                // The payload carries card data; only its size and the error
                // position are logged.
                warn!(
                    channel = message.channel(),
                    bytes = message.payload().len(),
                    category = ?err.classify(),
                    line = err.line(),
                    column = err.column(),
                    "Invalid message format, discarding"
                );
                return DispatchOutcome::DecodeFailed;
            }
            Err(err) => {
                error!(channel = message.channel(), error = %err, "Error handling message, discarding");
                return DispatchOutcome::HandlerFailed;
            }
        };

        self.publish(channels, outbound).await
    }

    async fn publish(&self, channels: &mut DualChannelManager, outbound: Outbound) -> DispatchOutcome {
        let command = channels.command_connection();
        if !command.is_open() {
            error!(channel = %self.output_channel, "Command connection not open, dropping outbound event");
            return DispatchOutcome::Dropped;
        }

        let payload = match outbound() {
            Ok(payload) => payload,
            Err(err) => {
                error!(channel = %self.output_channel, error = %err, "Failed to encode outbound event");
                return DispatchOutcome::PublishFailed;
            }
        };

        match command.publish(&self.output_channel, &payload).await {
            Ok(()) => {
                info!(channel = %self.output_channel, "Published outbound event");
                DispatchOutcome::Published
            }
            Err(err) => {
                error!(channel = %self.output_channel, error = %err, "Failed to publish, dropping outbound event");
                DispatchOutcome::PublishFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::BrokerAddress;
    use crate::domain::ports::BrokerConnector;
    use crate::infrastructure::in_memory::InMemoryBroker;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Deserialize)]
    struct Ping {
        n: u32,
    }

    #[derive(Serialize)]
    struct Pong {
        n: u32,
    }

    struct Echo;

    impl EventHandler for Echo {
        type Input = Ping;
        type Output = Pong;

        fn handle(&self, event: Ping) -> Result<Option<Pong>> {
            match event.n {
                0 => Ok(None),
                13 => Err(BridgeError::HandlerError("unlucky".to_string())),
                n => Ok(Some(Pong { n })),
            }
        }
    }

    /// Counts how often outputs are stamped.
    struct Counting(Arc<AtomicUsize>);

    impl EventHandler for Counting {
        type Input = Ping;
        type Output = Pong;

        fn handle(&self, event: Ping) -> Result<Option<Pong>> {
            Ok(Some(Pong { n: event.n }))
        }

        fn stamp(&self, output: Pong) -> Pong {
            self.0.fetch_add(1, Ordering::SeqCst);
            Pong { n: output.n + 100 }
        }
    }

    async fn connect(broker: &InMemoryBroker) -> DualChannelManager {
        let address = BrokerAddress::default();
        DualChannelManager::new(
            broker.open_command(&address).await.unwrap(),
            broker.open_subscription(&address).await.unwrap(),
        )
    }

    #[test]
    fn test_duplicate_subscribe_rejected() {
        let mut router = EventRouter::new("out");
        router.subscribe("in", Echo).unwrap();
        assert!(matches!(
            router.subscribe("in", Echo),
            Err(BridgeError::DuplicateSubscription(channel)) if channel == "in"
        ));
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let broker = InMemoryBroker::new();
        let mut channels = connect(&broker).await;
        let mut router = EventRouter::new("out");
        router.subscribe("in", Echo).unwrap();

        let cases = [
            (r#"{"n": 5}"#, DispatchOutcome::Published),
            (r#"{"n": 0}"#, DispatchOutcome::NoOutput),
            (r#"{"n": 13}"#, DispatchOutcome::HandlerFailed),
            ("garbage", DispatchOutcome::DecodeFailed),
        ];
        for (payload, expected) in cases {
            let outcome = router
                .dispatch(&mut channels, InboundMessage::new("in", payload))
                .await;
            assert_eq!(outcome, expected, "payload {payload}");
        }

        let outcome = router
            .dispatch(&mut channels, InboundMessage::new("elsewhere", r#"{"n": 5}"#))
            .await;
        assert_eq!(outcome, DispatchOutcome::Unrouted);

        assert_eq!(broker.published("out"), vec![r#"{"n":5}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_drops_when_command_closed() {
        let broker = InMemoryBroker::new();
        let mut channels = connect(&broker).await;
        let mut router = EventRouter::new("out");
        router.subscribe("in", Echo).unwrap();

        channels.command_connection().close().await.unwrap();
        let outcome = router
            .dispatch(&mut channels, InboundMessage::new("in", r#"{"n": 5}"#))
            .await;

        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert!(broker.published("out").is_empty());
    }

    #[tokio::test]
    async fn test_stamp_runs_only_when_publishing() {
        let broker = InMemoryBroker::new();
        let mut channels = connect(&broker).await;
        let stamped = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new("out");
        router.subscribe("in", Counting(stamped.clone())).unwrap();

        let outcome = router
            .dispatch(&mut channels, InboundMessage::new("in", r#"{"n": 1}"#))
            .await;
        assert_eq!(outcome, DispatchOutcome::Published);
        assert_eq!(broker.published("out"), vec![r#"{"n":101}"#.to_string()]);

        channels.command_connection().close().await.unwrap();
        let outcome = router
            .dispatch(&mut channels, InboundMessage::new("in", r#"{"n": 2}"#))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert_eq!(stamped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loop_ends_when_command_connection_lost() {
        let broker = InMemoryBroker::new();
        let mut channels = connect(&broker).await;
        let mut router = EventRouter::new("out");
        router.subscribe("in", Echo).unwrap();
        router.activate(&mut channels).await.unwrap();

        broker.sever_command_connections();
        broker.deliver("in", r#"{"n": 5}"#);
        let exit = router
            .dispatch_loop(&mut channels, &CancellationToken::new())
            .await;

        assert_eq!(exit, LoopExit::ConnectionLost);
        assert!(channels.subscription_connection().is_open());
        assert!(broker.published("out").is_empty());
    }

    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let broker = InMemoryBroker::new();
        let mut channels = connect(&broker).await;
        let mut router = EventRouter::new("out");
        router.subscribe("a", Echo).unwrap();
        router.subscribe("b", Echo).unwrap();

        router.activate(&mut channels).await.unwrap();
        router.activate(&mut channels).await.unwrap();
        assert!(router.is_active("a") && router.is_active("b"));
        assert_eq!(broker.stats().subscribes, 2);

        assert!(router.deactivate(&mut channels).await.is_empty());
        assert!(router.deactivate(&mut channels).await.is_empty());
        assert!(!router.is_active("a"));
        assert_eq!(broker.stats().unsubscribes, 2);
    }

    #[tokio::test]
    async fn test_activate_requires_open_connection() {
        let broker = InMemoryBroker::new();
        let mut channels = connect(&broker).await;
        let mut router = EventRouter::new("out");
        router.subscribe("in", Echo).unwrap();

        channels.subscription_connection().close().await.unwrap();
        assert!(matches!(
            router.activate(&mut channels).await,
            Err(BridgeError::NotOpen)
        ));
        assert!(!router.is_active("in"));
    }

    #[tokio::test]
    async fn test_deactivate_tolerates_closed_connection() {
        let broker = InMemoryBroker::new();
        let mut channels = connect(&broker).await;
        let mut router = EventRouter::new("out");
        router.subscribe("in", Echo).unwrap();
        router.activate(&mut channels).await.unwrap();

        broker.sever_subscription_connections();
        assert!(router.deactivate(&mut channels).await.is_empty());
        assert!(!router.is_active("in"));
    }
}
