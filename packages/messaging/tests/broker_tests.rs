#![allow(clippy::disallowed_methods)]

use std::time::Duration;

use flick_core::{DomainEvent, QueueSpec, UserId, WATCHLIST_QUEUE};
use futures_util::StreamExt;
use messaging::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, BrokerSession, Delivery,
    EventPublisher, InMemoryBroker, MemoryChannel, MemoryDelivery, PublishError,
};

async fn open_channel(broker: &InMemoryBroker) -> MemoryChannel {
    let connection = broker.connect().await.unwrap();
    let channel = connection.create_channel().await.unwrap();
    channel.declare_queue(&QueueSpec::default()).await.unwrap();
    channel
}

async fn next(stream: &mut messaging::DeliveryStream<MemoryDelivery>) -> MemoryDelivery {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for a delivery")
        .expect("stream ended")
        .unwrap()
}

#[tokio::test]
async fn test_publish_and_ack() {
    let broker = InMemoryBroker::start().await.unwrap();
    let channel = open_channel(&broker).await;

    channel.publish(WATCHLIST_QUEUE, b"hello").await.unwrap();
    assert_eq!(broker.queue_depth(WATCHLIST_QUEUE).await.unwrap(), 1);

    let mut stream = channel.consume(WATCHLIST_QUEUE, "test").await.unwrap();
    let delivery = next(&mut stream).await;
    assert_eq!(delivery.body(), b"hello");
    assert_eq!(delivery.delivery_count(), 1);
    assert!(!delivery.redelivered());

    let stats = broker.queue_stats(WATCHLIST_QUEUE).await.unwrap().unwrap();
    assert_eq!((stats.ready, stats.unacked, stats.consumers), (0, 1, 1));

    delivery.ack().await.unwrap();
    let stats = broker.queue_stats(WATCHLIST_QUEUE).await.unwrap().unwrap();
    assert_eq!((stats.ready, stats.unacked), (0, 0));

    // Settling twice is an error
    assert!(matches!(
        delivery.ack().await,
        Err(BrokerError::UnknownDelivery(_))
    ));
}

#[tokio::test]
async fn test_nack_with_requeue_redelivers() {
    let broker = InMemoryBroker::start().await.unwrap();
    let channel = open_channel(&broker).await;
    channel.publish(WATCHLIST_QUEUE, b"retry me").await.unwrap();

    let mut stream = channel.consume(WATCHLIST_QUEUE, "test").await.unwrap();
    let first = next(&mut stream).await;
    first.nack(true).await.unwrap();

    let second = next(&mut stream).await;
    assert_eq!(second.body(), b"retry me");
    assert_eq!(second.delivery_count(), 2);
    assert!(second.redelivered());

    second.nack(false).await.unwrap();
    assert_eq!(broker.queue_depth(WATCHLIST_QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_closing_channel_requeues_unacked() {
    let broker = InMemoryBroker::start().await.unwrap();
    let first = open_channel(&broker).await;
    first.publish(WATCHLIST_QUEUE, b"one").await.unwrap();
    first.publish(WATCHLIST_QUEUE, b"two").await.unwrap();

    let mut stream = first.consume(WATCHLIST_QUEUE, "first").await.unwrap();
    let _one = next(&mut stream).await;
    let _two = next(&mut stream).await;
    first.close().await.unwrap();

    let stats = broker.queue_stats(WATCHLIST_QUEUE).await.unwrap().unwrap();
    assert_eq!((stats.ready, stats.unacked, stats.consumers), (2, 0, 0));

    let second = open_channel(&broker).await;
    let mut stream = second.consume(WATCHLIST_QUEUE, "second").await.unwrap();
    let one = next(&mut stream).await;
    let two = next(&mut stream).await;
    assert_eq!(one.body(), b"one");
    assert_eq!(two.body(), b"two");
    assert!(one.redelivered());
}

#[tokio::test]
async fn test_publish_to_undeclared_queue_is_dropped() {
    let broker = InMemoryBroker::start().await.unwrap();
    let channel = open_channel(&broker).await;

    channel.publish("nowhere", b"lost").await.unwrap();
    assert!(broker.queue_stats("nowhere").await.unwrap().is_none());
    assert!(matches!(
        channel.consume("nowhere", "test").await,
        Err(BrokerError::QueueNotFound(_))
    ));
}

#[tokio::test]
async fn test_round_robin_across_consumers() {
    let broker = InMemoryBroker::start().await.unwrap();
    let a = open_channel(&broker).await;
    let b = open_channel(&broker).await;
    let mut stream_a = a.consume(WATCHLIST_QUEUE, "a").await.unwrap();
    let mut stream_b = b.consume(WATCHLIST_QUEUE, "b").await.unwrap();

    for body in [b"1", b"2", b"3", b"4"] {
        a.publish(WATCHLIST_QUEUE, body).await.unwrap();
    }

    let got_a = [next(&mut stream_a).await, next(&mut stream_a).await];
    let got_b = [next(&mut stream_b).await, next(&mut stream_b).await];
    assert_eq!(got_a[0].body(), b"1");
    assert_eq!(got_b[0].body(), b"2");
    assert_eq!(got_a[1].body(), b"3");
    assert_eq!(got_b[1].body(), b"4");
}

#[tokio::test]
async fn test_connect_fails_when_broker_is_down() {
    let broker = InMemoryBroker::start().await.unwrap();
    broker.shutdown().await;

    assert!(matches!(
        broker.connect().await,
        Err(BrokerError::Unreachable(_))
    ));
}

#[tokio::test]
async fn test_session_close_releases_connection() {
    let broker = InMemoryBroker::start().await.unwrap();

    let session = BrokerSession::open(&broker, &QueueSpec::default())
        .await
        .unwrap();
    assert_eq!(session.queue().name, WATCHLIST_QUEUE);
    assert_eq!(broker.connection_count().await.unwrap(), 1);
    assert!(broker.queue_stats(WATCHLIST_QUEUE).await.unwrap().is_some());

    session.close().await.unwrap();
    assert_eq!(broker.connection_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_session_close_releases_connection_when_channel_close_fails() {
    let broker = InMemoryBroker::start().await.unwrap();
    let session = BrokerSession::open(&broker, &QueueSpec::default())
        .await
        .unwrap();

    session.channel().close().await.unwrap();

    assert!(matches!(
        session.close().await,
        Err(BrokerError::ChannelClosed)
    ));
    assert_eq!(broker.connection_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_publisher_connects_lazily() {
    let broker = InMemoryBroker::start().await.unwrap();
    let publisher = EventPublisher::new(broker.clone(), QueueSpec::default());

    assert!(!publisher.is_connected().await);
    assert_eq!(broker.connection_count().await.unwrap(), 0);

    let event = DomainEvent::user_created(UserId::new());
    publisher.publish(&event).await.unwrap();
    publisher.publish(&event).await.unwrap();

    assert!(publisher.is_connected().await);
    assert_eq!(broker.connection_count().await.unwrap(), 1);
    assert_eq!(broker.queue_depth(WATCHLIST_QUEUE).await.unwrap(), 2);
}

#[tokio::test]
async fn test_publisher_reopens_after_close() {
    let broker = InMemoryBroker::start().await.unwrap();
    let publisher = EventPublisher::new(broker.clone(), QueueSpec::default());
    let event = DomainEvent::user_created(UserId::new());

    publisher.publish(&event).await.unwrap();
    publisher.close().await.unwrap();
    assert_eq!(broker.connection_count().await.unwrap(), 0);

    publisher.publish(&event).await.unwrap();
    assert_eq!(broker.connection_count().await.unwrap(), 1);
    assert_eq!(broker.queue_depth(WATCHLIST_QUEUE).await.unwrap(), 2);
}

#[tokio::test]
async fn test_publish_fails_when_broker_is_down() {
    let broker = InMemoryBroker::start().await.unwrap();
    let publisher = EventPublisher::new(broker.clone(), QueueSpec::default());
    broker.shutdown().await;

    let event = DomainEvent::user_created(UserId::new());
    assert!(matches!(
        publisher.publish(&event).await,
        Err(PublishError::Broker(BrokerError::Unreachable(_)))
    ));
    assert!(!publisher.publish_best_effort(&event).await);
    assert!(!publisher.is_connected().await);
}
