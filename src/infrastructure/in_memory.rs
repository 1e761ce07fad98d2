use crate::domain::connection::{BrokerAddress, ConnectionState, InboundMessage};
use crate::domain::ports::{
    BrokerConnector, CommandConnection, CommandConnectionBox, Connection, SubscriptionConnection,
    SubscriptionConnectionBox,
};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Something that happened on the broker, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    CommandOpened,
    SubscriptionOpened,
    Subscribed(String),
    Unsubscribed(String),
    Published(String),
    /// The broker dropped a subscription connection on its own.
    SubscriptionSevered,
    /// The broker dropped a command connection on its own.
    CommandSevered,
    SubscriptionClosed,
    CommandClosed,
}

/// Counters over the broker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub command_open_attempts: usize,
    pub subscription_open_attempts: usize,
    pub command_closes: usize,
    pub subscription_closes: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub published: usize,
    pub failed_publishes: usize,
}

/// A message accepted by the broker from a command connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: String,
}

struct Subscriber {
    channels: BTreeSet<String>,
    sender: mpsc::UnboundedSender<InboundMessage>,
    link: Arc<Link>,
}

#[derive(Default)]
struct BrokerState {
    stats: BrokerStats,
    journal: Vec<BrokerEvent>,
    published: Vec<PublishedMessage>,
    subscribers: HashMap<u64, Subscriber>,
    command_links: Vec<Arc<Link>>,
    next_subscriber: u64,
    failing_command_opens: usize,
    failing_subscription_opens: usize,
    failing_publishes: usize,
}

const LINK_OPEN: u8 = 0;
const LINK_SEVERED: u8 = 1;
const LINK_RELEASED: u8 = 2;

/// Lifecycle shared between a connection and the broker that can sever it.
///
/// A severed link is dead but still held by its client; releasing it is the
/// client's `close()`.
struct Link(AtomicU8);

impl Link {
    fn open() -> Arc<Self> {
        Arc::new(Self(AtomicU8::new(LINK_OPEN)))
    }

    fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire) == LINK_OPEN
    }

    /// Open to severed. Returns whether this call performed the transition.
    fn sever(&self) -> bool {
        self.0
            .compare_exchange(LINK_OPEN, LINK_SEVERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Open or severed to released. Returns whether this call performed the
    /// transition.
    fn release(&self) -> bool {
        self.0.swap(LINK_RELEASED, Ordering::AcqRel) != LINK_RELEASED
    }
}

/// A process-local pub/sub broker.
///
/// Cloning shares the same broker. Failures can be scripted and connections
/// severed, which makes it the backend for tests and for running the bridge
/// without an external broker.
#[derive(Default, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new, empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` command-connection opens fail.
    pub fn fail_next_command_opens(&self, count: usize) {
        self.lock().failing_command_opens = count;
    }

    /// Makes the next `count` subscription-connection opens fail.
    pub fn fail_next_subscription_opens(&self, count: usize) {
        self.lock().failing_subscription_opens = count;
    }

    /// Makes the next `count` publishes fail while the connection stays open.
    pub fn fail_next_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    /// Delivers a message to every open subscriber of `channel`.
    ///
    /// Returns the number of receivers, like Redis `PUBLISH`.
    pub fn deliver(&self, channel: &str, payload: impl Into<Vec<u8>>) -> usize {
        let state = self.lock();
        fan_out(&state, channel, payload.into())
    }

    /// Drops every command connection as if the server went away.
    pub fn sever_command_connections(&self) {
        let mut state = self.lock();
        let links: Vec<_> = state.command_links.drain(..).collect();
        for link in links {
            if link.sever() {
                state.journal.push(BrokerEvent::CommandSevered);
            }
        }
    }

    /// Drops every subscription connection. Pending receivers see end of stream.
    pub fn sever_subscription_connections(&self) {
        let mut state = self.lock();
        let subscribers: Vec<_> = state.subscribers.drain().map(|(_, s)| s).collect();
        for subscriber in subscribers {
            if subscriber.link.sever() {
                state.journal.push(BrokerEvent::SubscriptionSevered);
            }
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|s| s.link.is_open() && s.channels.contains(channel))
            .count()
    }

    pub fn published(&self, channel: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn stats(&self) -> BrokerStats {
        self.lock().stats
    }

    pub fn journal(&self) -> Vec<BrokerEvent> {
        self.lock().journal.clone()
    }
}

fn fan_out(state: &BrokerState, channel: &str, payload: Vec<u8>) -> usize {
    let mut receivers = 0;
    for subscriber in state.subscribers.values() {
        if subscriber.link.is_open()
            && subscriber.channels.contains(channel)
            && subscriber
                .sender
                .send(InboundMessage::new(channel, payload.clone()))
                .is_ok()
        {
            receivers += 1;
        }
    }
    receivers
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn open_command(&self, _address: &BrokerAddress) -> Result<CommandConnectionBox> {
        let mut state = self.lock();
        state.stats.command_open_attempts += 1;
        if state.failing_command_opens > 0 {
            state.failing_command_opens -= 1;
            return Err(BridgeError::ConnectionError(
                "in-memory broker refused command connection".to_string(),
            ));
        }

        let link = Link::open();
        state.command_links.push(link.clone());
        state.journal.push(BrokerEvent::CommandOpened);

        Ok(Box::new(InMemoryCommandConnection {
            broker: self.clone(),
            link,
        }))
    }

    async fn open_subscription(
        &self,
        _address: &BrokerAddress,
    ) -> Result<SubscriptionConnectionBox> {
        let mut state = self.lock();
        state.stats.subscription_open_attempts += 1;
        if state.failing_subscription_opens > 0 {
            state.failing_subscription_opens -= 1;
            return Err(BridgeError::ConnectionError(
                "in-memory broker refused subscription connection".to_string(),
            ));
        }

        let id = state.next_subscriber;
        state.next_subscriber += 1;
        let link = Link::open();
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.insert(
            id,
            Subscriber {
                channels: BTreeSet::new(),
                sender,
                link: link.clone(),
            },
        );
        state.journal.push(BrokerEvent::SubscriptionOpened);

        Ok(Box::new(InMemorySubscriptionConnection {
            broker: self.clone(),
            id,
            link,
            receiver,
        }))
    }
}

pub struct InMemoryCommandConnection {
    broker: InMemoryBroker,
    link: Arc<Link>,
}

#[async_trait]
impl Connection for InMemoryCommandConnection {
    fn state(&self) -> ConnectionState {
        if self.link.is_open() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.link.release() {
            let mut state = self.broker.lock();
            state.command_links.retain(|l| !Arc::ptr_eq(l, &self.link));
            state.stats.command_closes += 1;
            state.journal.push(BrokerEvent::CommandClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl CommandConnection for InMemoryCommandConnection {
    async fn publish(&mut self, channel: &str, payload: &str) -> Result<()> {
        if !self.link.is_open() {
            return Err(BridgeError::NotOpen);
        }
        let mut state = self.broker.lock();
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            state.stats.failed_publishes += 1;
            return Err(BridgeError::PublishError(format!(
                "in-memory broker rejected publish to {channel}"
            )));
        }
        state.stats.published += 1;
        state.published.push(PublishedMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        state
            .journal
            .push(BrokerEvent::Published(channel.to_string()));
        fan_out(&state, channel, payload.as_bytes().to_vec());
        Ok(())
    }
}

pub struct InMemorySubscriptionConnection {
    broker: InMemoryBroker,
    id: u64,
    link: Arc<Link>,
    receiver: mpsc::UnboundedReceiver<InboundMessage>,
}

#[async_trait]
impl Connection for InMemorySubscriptionConnection {
    fn state(&self) -> ConnectionState {
        if self.link.is_open() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.link.release() {
            let mut state = self.broker.lock();
            state.subscribers.remove(&self.id);
            state.stats.subscription_closes += 1;
            state.journal.push(BrokerEvent::SubscriptionClosed);
        }
        self.receiver.close();
        Ok(())
    }
}

#[async_trait]
impl SubscriptionConnection for InMemorySubscriptionConnection {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        if !self.link.is_open() {
            return Err(BridgeError::NotOpen);
        }
        let mut state = self.broker.lock();
        let added = match state.subscribers.get_mut(&self.id) {
            Some(subscriber) => subscriber.channels.insert(channel.to_string()),
            None => return Err(BridgeError::NotOpen),
        };
        if added {
            state.stats.subscribes += 1;
            state
                .journal
                .push(BrokerEvent::Subscribed(channel.to_string()));
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        if !self.link.is_open() {
            return Err(BridgeError::NotOpen);
        }
        let mut state = self.broker.lock();
        let removed = match state.subscribers.get_mut(&self.id) {
            Some(subscriber) => subscriber.channels.remove(channel),
            None => return Err(BridgeError::NotOpen),
        };
        if removed {
            state.stats.unsubscribes += 1;
            state
                .journal
                .push(BrokerEvent::Unsubscribed(channel.to_string()));
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<InboundMessage> {
        if !self.link.is_open() {
            return None;
        }
        let message = self.receiver.recv().await;
        if message.is_none() {
            self.link.sever();
        }
        message
    }
}
