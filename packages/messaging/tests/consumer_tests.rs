#![allow(clippy::disallowed_methods)]

mod common;

use std::time::Duration;

use common::{RecordingScopes, next_handled, wait_for};
use flick_core::{DomainEvent, QueueSpec, UserId, WATCHLIST_QUEUE};
use messaging::{
    ConsumerConfig, ConsumerError, ConsumerEvent, Disposition, EventConsumer, EventPublisher,
    InMemoryBroker, RedeliveryPolicy,
};
use tokio::sync::{broadcast, oneshot};

const DEAD_LETTER_QUEUE: &str = "WatchlistQueue.dead-letter";

struct Harness {
    broker: InMemoryBroker,
    publisher: EventPublisher<InMemoryBroker>,
    events: broadcast::Receiver<ConsumerEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<Result<(), ConsumerError>>,
}

impl Harness {
    async fn start(scopes: RecordingScopes, config: ConsumerConfig) -> Self {
        let broker = InMemoryBroker::start().await.unwrap();
        let publisher = EventPublisher::new(broker.clone(), QueueSpec::default());
        let (tx, mut events) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let consumer = EventConsumer::new(broker.clone(), scopes, config).with_events(tx);
        let task = tokio::spawn(consumer.start_listening(async move {
            let _ = shutdown_rx.await;
        }));

        wait_for(
            &mut events,
            ConsumerEvent::Started {
                queue: WATCHLIST_QUEUE.to_string(),
            },
        )
        .await;

        Self {
            broker,
            publisher,
            events,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn stop(mut self) -> Result<(), ConsumerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("consumer did not stop")
            .unwrap()
    }
}

#[tokio::test]
async fn test_duplicate_user_created_is_applied_once() {
    let scopes = RecordingScopes::default();
    let mut harness = Harness::start(scopes.clone(), ConsumerConfig::default()).await;
    let user_id = UserId::new();
    let event = DomainEvent::user_created(user_id);

    harness.publisher.publish(&event).await.unwrap();
    harness.publisher.publish(&event).await.unwrap();

    for _ in 0..2 {
        let (disposition, handled_id, _) = next_handled(&mut harness.events).await;
        assert_eq!(disposition, Disposition::Acked);
        assert_eq!(handled_id, Some(user_id));
    }

    assert_eq!(scopes.calls(), 2);
    assert_eq!(scopes.created().len(), 1);
    assert_eq!(harness.broker.queue_depth(WATCHLIST_QUEUE).await.unwrap(), 0);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_unrecognized_and_malformed_messages_are_discarded() {
    let scopes = RecordingScopes::default();
    let mut harness = Harness::start(scopes.clone(), ConsumerConfig::default()).await;

    harness
        .publisher
        .publish_raw(br#"{"EventType":"UserDeleted","UserId":"11111111-1111-1111-1111-111111111111"}"#)
        .await
        .unwrap();
    harness.publisher.publish_raw(b"not json").await.unwrap();

    for _ in 0..2 {
        let (disposition, user_id, _) = next_handled(&mut harness.events).await;
        assert_eq!(disposition, Disposition::Discarded);
        assert_eq!(user_id, None);
    }

    assert_eq!(scopes.calls(), 0);
    let stats = harness.broker.queue_stats(WATCHLIST_QUEUE).await.unwrap().unwrap();
    assert_eq!((stats.ready, stats.unacked), (0, 0));
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_failure_is_requeued_until_it_succeeds() {
    let scopes = RecordingScopes::failing(2);
    let mut harness = Harness::start(scopes.clone(), ConsumerConfig::default()).await;
    let user_id = UserId::new();

    harness
        .publisher
        .publish(&DomainEvent::user_created(user_id))
        .await
        .unwrap();

    assert_eq!(
        next_handled(&mut harness.events).await,
        (Disposition::Requeued, Some(user_id), 1)
    );
    assert_eq!(
        next_handled(&mut harness.events).await,
        (Disposition::Requeued, Some(user_id), 2)
    );
    assert_eq!(
        next_handled(&mut harness.events).await,
        (Disposition::Acked, Some(user_id), 3)
    );

    assert!(scopes.created().contains(&user_id));
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_poison_message_moves_to_dead_letter_queue() {
    let scopes = RecordingScopes::always_failing();
    let config = ConsumerConfig::default().with_redelivery(RedeliveryPolicy::dead_letter(
        3,
        QueueSpec::transient(DEAD_LETTER_QUEUE),
    ));
    let mut harness = Harness::start(scopes.clone(), config).await;
    let event = DomainEvent::user_created(UserId::new());

    harness.publisher.publish(&event).await.unwrap();

    let dispositions = [
        next_handled(&mut harness.events).await.0,
        next_handled(&mut harness.events).await.0,
        next_handled(&mut harness.events).await.0,
    ];
    assert_eq!(
        dispositions,
        [
            Disposition::Requeued,
            Disposition::Requeued,
            Disposition::DeadLettered
        ]
    );

    assert_eq!(harness.broker.queue_depth(WATCHLIST_QUEUE).await.unwrap(), 0);
    assert_eq!(harness.broker.queue_depth(DEAD_LETTER_QUEUE).await.unwrap(), 1);
    assert_eq!(scopes.calls(), 3);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_session() {
    let harness = Harness::start(RecordingScopes::default(), ConsumerConfig::default()).await;
    let broker = harness.broker.clone();
    let mut events = harness.events.resubscribe();

    // Publisher plus consumer
    harness
        .publisher
        .publish(&DomainEvent::user_created(UserId::new()))
        .await
        .unwrap();
    assert_eq!(broker.connection_count().await.unwrap(), 2);
    harness.publisher.close().await.unwrap();

    harness.stop().await.unwrap();
    wait_for(
        &mut events,
        ConsumerEvent::Stopped {
            queue: WATCHLIST_QUEUE.to_string(),
        },
    )
    .await;
    assert_eq!(broker.connection_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_broker_loss_ends_listening_with_error() {
    let harness = Harness::start(RecordingScopes::default(), ConsumerConfig::default()).await;

    harness.broker.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(5), harness.task)
        .await
        .expect("consumer did not notice the broker going away")
        .unwrap();
    assert!(matches!(result, Err(ConsumerError::ConnectionLost)));
}
