#![allow(dead_code)]

use payment_bridge::application::channels::DualChannelManager;
use payment_bridge::application::payment::PaymentHandler;
use payment_bridge::application::router::EventRouter;
use payment_bridge::domain::connection::BrokerAddress;
use payment_bridge::domain::ports::BrokerConnector;
use payment_bridge::infrastructure::in_memory::InMemoryBroker;
use std::time::Duration;

pub const INPUT: &str = "bookingCompleted";
pub const OUTPUT: &str = "paymentCompleted";

pub fn booking_payload(price: &str) -> String {
    format!(
        r#"{{"price": {price}, "cardNumber": "4111111111111111", "expiry": "12/30", "cvv": "123"}}"#
    )
}

pub fn payment_router() -> EventRouter {
    let mut router = EventRouter::new(OUTPUT);
    router
        .subscribe(INPUT, PaymentHandler::new())
        .expect("Failed to register payment handler");
    router
}

pub async fn connect(broker: &InMemoryBroker) -> DualChannelManager {
    let address = BrokerAddress::default();
    let command = broker.open_command(&address).await.unwrap();
    let subscription = broker.open_subscription(&address).await.unwrap();
    DualChannelManager::new(command, subscription)
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn parse(payload: &str) -> serde_json::Value {
    serde_json::from_str(payload).expect("Published payload is not JSON")
}
