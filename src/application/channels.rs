use crate::domain::ports::{
    CommandConnection, CommandConnectionBox, Connection, SubscriptionConnection,
    SubscriptionConnectionBox,
};
use crate::error::BridgeError;
use tracing::{debug, warn};

/// Owns the command and subscription connections as one unit.
///
/// Built by the supervisor once both connections are open. Both report open
/// until [`DualChannelManager::close_all`] runs or a session fails underneath.
pub struct DualChannelManager {
    command: CommandConnectionBox,
    subscription: SubscriptionConnectionBox,
}

impl DualChannelManager {
    pub fn new(command: CommandConnectionBox, subscription: SubscriptionConnectionBox) -> Self {
        Self {
            command,
            subscription,
        }
    }

    pub fn command_connection(&mut self) -> &mut dyn CommandConnection {
        self.command.as_mut()
    }

    pub fn subscription_connection(&mut self) -> &mut dyn SubscriptionConnection {
        self.subscription.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.command.is_open() && self.subscription.is_open()
    }

    /// Closes the subscription connection, then the command connection.
    ///
    /// Either one may already be closed. Failures do not stop the second close;
    /// they are returned for the caller to report.
    pub async fn close_all(&mut self) -> Vec<BridgeError> {
        let mut errors = Vec::new();
        if let Some(err) = close_quietly(self.subscription.as_mut(), "subscription").await {
            errors.push(err);
        }
        if let Some(err) = close_quietly(self.command.as_mut(), "command").await {
            errors.push(err);
        }
        errors
    }
}

/// Closes one connection, turning any failure into a logged cleanup error.
pub(crate) async fn close_quietly<C>(connection: &mut C, role: &str) -> Option<BridgeError>
where
    C: Connection + ?Sized,
{
    match connection.close().await {
        Ok(()) => {
            debug!(role, "Connection closed");
            None
        }
        Err(err) => {
            warn!(role, error = %err, "Failed to close connection");
            Some(BridgeError::CleanupError(format!("{role} connection: {err}")))
        }
    }
}
