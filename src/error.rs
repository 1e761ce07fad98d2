use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Broker error: {0}")]
    BrokerError(#[from] redis::RedisError),
    #[error("Connection is not open")]
    NotOpen,
    #[error("Decode error: {0}")]
    DecodeError(#[source] serde_json::Error),
    #[error("Encode error: {0}")]
    EncodeError(#[source] serde_json::Error),
    #[error("Handler error: {0}")]
    HandlerError(String),
    #[error("Publish error: {0}")]
    PublishError(String),
    #[error("Cleanup error: {0}")]
    CleanupError(String),
    #[error("Channel already has a handler: {0}")]
    DuplicateSubscription(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
