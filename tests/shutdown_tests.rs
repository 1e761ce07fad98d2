use payment_bridge::application::shutdown::{ShutdownCoordinator, ShutdownPhase};
use payment_bridge::infrastructure::in_memory::{BrokerEvent, InMemoryBroker};
use std::sync::Arc;

mod common;

use common::INPUT;

#[tokio::test]
async fn test_unwind_order() {
    let broker = InMemoryBroker::new();
    let mut channels = common::connect(&broker).await;
    let mut router = common::payment_router();
    router.activate(&mut channels).await.unwrap();

    let coordinator = ShutdownCoordinator::new();
    coordinator.trigger();
    assert!(coordinator.unwind(&mut router, &mut channels).await);

    assert_eq!(coordinator.phase(), ShutdownPhase::Terminated);
    assert_eq!(
        broker.journal(),
        vec![
            BrokerEvent::CommandOpened,
            BrokerEvent::SubscriptionOpened,
            BrokerEvent::Subscribed(INPUT.to_string()),
            BrokerEvent::Unsubscribed(INPUT.to_string()),
            BrokerEvent::SubscriptionClosed,
            BrokerEvent::CommandClosed,
        ]
    );
}

#[tokio::test]
async fn test_unwind_runs_once() {
    let broker = InMemoryBroker::new();
    let mut channels = common::connect(&broker).await;
    let mut router = common::payment_router();
    router.activate(&mut channels).await.unwrap();

    let coordinator = Arc::new(ShutdownCoordinator::new());
    for _ in 0..5 {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.trigger() })
            .await
            .unwrap();
    }

    assert!(coordinator.unwind(&mut router, &mut channels).await);
    assert!(!coordinator.unwind(&mut router, &mut channels).await);
    assert!(!coordinator.terminate_idle());

    let stats = broker.stats();
    assert_eq!(stats.unsubscribes, 1);
    assert_eq!(stats.subscription_closes, 1);
    assert_eq!(stats.command_closes, 1);
}

#[tokio::test]
async fn test_unwind_with_connections_already_gone() {
    let broker = InMemoryBroker::new();
    let mut channels = common::connect(&broker).await;
    let mut router = common::payment_router();
    router.activate(&mut channels).await.unwrap();

    broker.sever_subscription_connections();
    broker.sever_command_connections();

    let coordinator = ShutdownCoordinator::new();
    assert!(coordinator.unwind(&mut router, &mut channels).await);
    assert_eq!(coordinator.phase(), ShutdownPhase::Terminated);
    assert!(coordinator.is_shutting_down());
    assert!(!router.is_active(INPUT));
    assert_eq!(broker.stats().unsubscribes, 0);
}

#[tokio::test]
async fn test_close_and_unsubscribe_twice_is_harmless() {
    let broker = InMemoryBroker::new();
    let mut channels = common::connect(&broker).await;
    let mut router = common::payment_router();
    router.activate(&mut channels).await.unwrap();

    assert!(router.deactivate(&mut channels).await.is_empty());
    assert!(router.deactivate(&mut channels).await.is_empty());
    assert!(channels.close_all().await.is_empty());
    assert!(channels.close_all().await.is_empty());

    let stats = broker.stats();
    assert_eq!(stats.unsubscribes, 1);
    assert_eq!(stats.subscription_closes, 1);
    assert_eq!(stats.command_closes, 1);
}
