use crate::application::supervisor::DEFAULT_RETRY_INTERVAL;
use crate::domain::connection::{BrokerAddress, DEFAULT_BROKER_ADDRESS};
use clap::{Parser, ValueEnum};
use std::time::Duration;

pub const DEFAULT_INPUT_CHANNEL: &str = "bookingCompleted";
pub const DEFAULT_OUTPUT_CHANNEL: &str = "paymentCompleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrokerKind {
    /// A Redis server at the configured URL.
    Redis,
    /// An in-process broker; nothing leaves the process.
    Memory,
}

/// Bridges completed bookings to completed payments over Redis pub/sub.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Broker connection URL
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_BROKER_ADDRESS, hide_env_values = true)]
    pub redis_url: String,

    /// Channel carrying inbound booking events
    #[arg(long, env = "BRIDGE_INPUT_CHANNEL", default_value = DEFAULT_INPUT_CHANNEL)]
    pub input_channel: String,

    /// Channel receiving outbound payment events
    #[arg(long, env = "BRIDGE_OUTPUT_CHANNEL", default_value = DEFAULT_OUTPUT_CHANNEL)]
    pub output_channel: String,

    /// Fixed delay between connection attempts, in milliseconds
    #[arg(long, env = "BRIDGE_RETRY_INTERVAL_MS", default_value_t = DEFAULT_RETRY_INTERVAL.as_millis() as u64)]
    pub retry_interval_ms: u64,

    /// Broker backend
    #[arg(long, value_enum, default_value = "redis")]
    pub broker: BrokerKind,
}

impl Cli {
    pub fn address(&self) -> BrokerAddress {
        BrokerAddress::new(self.redis_url.clone())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_arguments() {
        let cli = Cli::try_parse_from([
            "payment-bridge",
            "--redis-url",
            "redis://broker:6380",
            "--input-channel",
            "in",
            "--output-channel",
            "out",
            "--retry-interval-ms",
            "250",
            "--broker",
            "memory",
        ])
        .unwrap();

        assert_eq!(cli.address().as_str(), "redis://broker:6380");
        assert_eq!(cli.input_channel, "in");
        assert_eq!(cli.output_channel, "out");
        assert_eq!(cli.retry_interval(), Duration::from_millis(250));
        assert_eq!(cli.broker, BrokerKind::Memory);
    }

    #[test]
    fn test_rejects_unknown_broker() {
        assert!(Cli::try_parse_from(["payment-bridge", "--broker", "kafka"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
