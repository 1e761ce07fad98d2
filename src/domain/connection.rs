use std::fmt;
use url::Url;

/// Default broker location when nothing is configured.
pub const DEFAULT_BROKER_ADDRESS: &str = "redis://localhost:6379";

/// Connection string for the broker.
///
/// Immutable once built. The `Display` form hides any password embedded in the
/// URL so the address can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerAddress(String);

impl BrokerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn redacted(&self) -> String {
        match Url::parse(&self.0) {
            Ok(mut url) if url.password().is_some() => {
                // Only fails for cannot-be-a-base URLs, which carry no password.
                let _ = url.set_password(Some("***"));
                url.to_string()
            }
            Ok(_) => self.0.clone(),
            Err(_) => "<unparseable broker address>".to_string(),
        }
    }
}

impl Default for BrokerAddress {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_ADDRESS)
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BrokerAddress").field(&self.redacted()).finish()
    }
}

/// Lifecycle state of a single broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    Closing,
}

/// A raw message as delivered by the broker. Lives for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    channel: String,
    payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
