#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Flaky, TestError};
use resilience::{
    CircuitState, MovieLookup, PolicyConfig, PolicyError, PolicyEvent, Recommendation,
    ResiliencePolicy,
};
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

fn movie_policy() -> ResiliencePolicy<MovieLookup> {
    ResiliencePolicy::new(PolicyConfig::default())
}

/// Drive the policy's circuit open with three exhausted calls.
async fn trip(policy: &ResiliencePolicy<MovieLookup>) {
    let down = Flaky::always(TestError::Unavailable);
    for _ in 0..3 {
        let result = policy.execute(|| down.call()).await;
        assert!(matches!(result, Err(PolicyError::RetriesExhausted { .. })));
    }
    assert_eq!(policy.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_within_three_retries() {
    let policy = movie_policy();
    let op = Flaky::failing(3, TestError::Unavailable);

    let started = Instant::now();
    let value = policy.execute(|| op.call()).await.unwrap();

    assert_eq!(value, 4);
    assert_eq!(op.calls(), 4);
    // 2s + 4s + 8s of backoff
    assert_eq!(started.elapsed(), Duration::from_secs(14));
    assert_eq!(policy.state(), CircuitState::Closed);
    assert_eq!(policy.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_count_once() {
    let policy = movie_policy();
    let op = Flaky::always(TestError::Unavailable);

    let result = policy.execute(|| op.call()).await;
    match result {
        Err(PolicyError::RetriesExhausted {
            policy: name,
            attempts,
            source,
        }) => {
            assert_eq!(name, "movie-lookup");
            assert_eq!(attempts, 4);
            assert!(matches!(source, TestError::Unavailable));
        }
        other => panic!("unexpected: {:?}", other),
    }

    assert_eq!(op.calls(), 4);
    assert_eq!(policy.consecutive_failures(), 1);
    assert_eq!(policy.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_opens_after_three_failures_and_rejects_without_calling() {
    let policy = movie_policy();
    trip(&policy).await;
    assert_eq!(policy.open_count(), 1);

    let op = Flaky::ok();
    tokio::time::advance(Duration::from_secs(29)).await;
    match policy.execute(|| op.call()).await {
        Err(PolicyError::CircuitOpen { retry_after, .. }) => {
            assert_eq!(retry_after, Duration::from_secs(1));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(op.calls(), 0);
    assert_eq!(policy.rejected_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_successful_probe_closes_circuit() {
    let policy = movie_policy();
    trip(&policy).await;

    tokio::time::advance(Duration::from_secs(30)).await;
    let op = Flaky::ok();
    assert_eq!(policy.execute(|| op.call()).await.unwrap(), 1);

    assert_eq!(policy.state(), CircuitState::Closed);
    assert_eq!(policy.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_and_restarts_break() {
    let policy = movie_policy();
    trip(&policy).await;

    tokio::time::advance(Duration::from_secs(30)).await;
    let down = Flaky::always(TestError::Unavailable);
    let result = policy.execute(|| down.call()).await;
    assert!(matches!(result, Err(PolicyError::RetriesExhausted { .. })));
    assert_eq!(policy.state(), CircuitState::Open);
    assert_eq!(policy.open_count(), 2);

    // The break restarted when the probe failed
    let op = Flaky::ok();
    let result = policy.execute(|| op.call()).await;
    match result {
        Err(PolicyError::CircuitOpen { retry_after, .. }) => {
            assert_eq!(retry_after, Duration::from_secs(30));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(op.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_probe_in_flight() {
    let policy = movie_policy();
    trip(&policy).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    let gate = Arc::new(Notify::new());
    let probe = {
        let policy = policy.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            policy
                .execute(|| {
                    let gate = gate.clone();
                    async move {
                        gate.notified().await;
                        Ok::<_, TestError>(7)
                    }
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(policy.state(), CircuitState::HalfOpen);

    let op = Flaky::ok();
    let result = policy.execute(|| op.call()).await;
    assert!(matches!(result, Err(PolicyError::CircuitOpen { .. })));
    assert_eq!(op.calls(), 0);

    gate.notify_one();
    assert_eq!(probe.await.unwrap().unwrap(), 7);
    assert_eq!(policy.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_frees_the_slot() {
    let policy = movie_policy();
    trip(&policy).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    let stuck = {
        let policy = policy.clone();
        tokio::spawn(async move {
            policy
                .execute(|| std::future::pending::<Result<(), TestError>>())
                .await
        })
    };
    tokio::task::yield_now().await;
    stuck.abort();
    assert!(stuck.await.unwrap_err().is_cancelled());
    assert_eq!(policy.state(), CircuitState::HalfOpen);

    let op = Flaky::ok();
    assert!(policy.execute(|| op.call()).await.is_ok());
    assert_eq!(policy.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failures_are_not_retried_or_counted() {
    let policy = movie_policy();
    let op = Flaky::always(TestError::Unauthorized);

    for _ in 0..5 {
        let result = policy.execute(|| op.call()).await;
        assert!(matches!(
            result,
            Err(PolicyError::Permanent {
                source: TestError::Unauthorized,
                ..
            })
        ));
    }

    assert_eq!(op.calls(), 5);
    assert_eq!(policy.consecutive_failures(), 0);
    assert_eq!(policy.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_during_probe_stays_half_open() {
    let policy = movie_policy();
    trip(&policy).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    let denied = Flaky::always(TestError::Unauthorized);
    let result = policy.execute(|| denied.call()).await;
    assert!(matches!(result, Err(PolicyError::Permanent { .. })));
    assert_eq!(policy.state(), CircuitState::HalfOpen);

    let op = Flaky::ok();
    assert!(policy.execute(|| op.call()).await.is_ok());
    assert_eq!(policy.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_policies_are_independent() {
    let movies = movie_policy();
    let recommendations = ResiliencePolicy::<Recommendation>::new(PolicyConfig::default());
    trip(&movies).await;

    let op = Flaky::ok();
    assert!(recommendations.execute(|| op.call()).await.is_ok());
    assert_eq!(recommendations.state(), CircuitState::Closed);
    assert_eq!(movies.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_events_are_broadcast() {
    let (tx, mut rx) = broadcast::channel(64);
    let policy = ResiliencePolicy::<MovieLookup>::with_events(PolicyConfig::default(), tx);

    let op = Flaky::failing(2, TestError::Unavailable);
    policy.execute(|| op.call()).await.unwrap();

    let delays: Vec<Duration> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            PolicyEvent::RetryScheduled { delay, .. } => Some(delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);

    trip(&policy).await;
    let _ = policy.execute(|| Flaky::ok().call()).await;

    let events: Vec<PolicyEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(events.iter().all(|e| e.policy() == "movie-lookup"));
    assert!(events.contains(&PolicyEvent::CircuitStateChanged {
        policy: "movie-lookup",
        from: CircuitState::Closed,
        to: CircuitState::Open,
    }));
    assert!(matches!(
        events.last(),
        Some(PolicyEvent::CallRejected {
            state: CircuitState::Open,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_events_without_receivers_do_not_fail_calls() {
    let (tx, rx) = broadcast::channel(1);
    drop(rx);
    let policy = ResiliencePolicy::<MovieLookup>::with_events(PolicyConfig::default(), tx);

    let op = Flaky::failing(3, TestError::Unavailable);
    assert_eq!(policy.execute(|| op.call()).await.unwrap(), 4);
}
