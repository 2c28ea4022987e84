//! Outbox relay.
//!
//! Publishes outbox rows written alongside state changes, so an event is
//! never lost because the broker was down when the change committed.

use std::sync::Arc;
use std::time::Duration;

use db::repositories::OutboxRepository;
use db::{Database, DbError};
use messaging::{BrokerConnector, EventPublisher};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often pending rows are polled when nobody nudges the relay.
    pub poll_interval: Duration,
    /// Rows published per pass.
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

impl RelayConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Result of one or more drain passes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub dispatched: usize,
    pub failed: usize,
}

impl DrainReport {
    fn add(&mut self, other: DrainReport) {
        self.dispatched += other.dispatched;
        self.failed += other.failed;
    }
}

/// Drains the outbox through an [`EventPublisher`].
pub struct OutboxRelay<C: BrokerConnector> {
    outbox: OutboxRepository,
    publisher: Arc<EventPublisher<C>>,
    config: RelayConfig,
    nudge: Arc<Notify>,
}

impl<C: BrokerConnector> OutboxRelay<C> {
    pub fn new(db: Database, publisher: Arc<EventPublisher<C>>, config: RelayConfig) -> Self {
        Self {
            outbox: OutboxRepository::new(db),
            publisher,
            config,
            nudge: Arc::new(Notify::new()),
        }
    }

    /// Notifying this wakes a running relay before its next poll.
    pub fn nudge(&self) -> Arc<Notify> {
        self.nudge.clone()
    }

    /// Publish pending rows, oldest first.
    ///
    /// A row that fails to publish keeps its place, gets its attempt count
    /// and last error recorded, and ends the pass so later rows don't
    /// overtake it.
    pub async fn drain_once(&self) -> Result<DrainReport, DbError> {
        let mut report = DrainReport::default();

        for entry in self.outbox.pending(self.config.batch_size).await? {
            match self.publisher.publish_raw(entry.body.as_bytes()).await {
                Ok(()) => {
                    self.outbox.mark_dispatched(entry.id).await?;
                    tracing::info!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        queue = %self.publisher.queue(),
                        "Published outbox entry"
                    );
                    report.dispatched += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Failed to publish outbox entry"
                    );
                    self.outbox.record_failure(entry.id, &e.to_string()).await?;
                    report.failed += 1;
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Run the relay in the background until [`RelayHandle::stop`].
    pub fn spawn(self) -> RelayHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut total = DrainReport::default();
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(queue = %self.publisher.queue(), "Outbox relay started");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                    _ = self.nudge.notified() => {}
                }

                match self.drain_once().await {
                    Ok(report) => total.add(report),
                    Err(e) => tracing::error!(error = %e, "Outbox drain failed"),
                }
            }

            tracing::info!(
                dispatched = total.dispatched,
                failed = total.failed,
                "Outbox relay stopped"
            );
            total
        });

        RelayHandle {
            stop_tx: Some(stop_tx),
            handle,
        }
    }
}

/// Handle to a running [`OutboxRelay`].
pub struct RelayHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<DrainReport>,
}

impl RelayHandle {
    /// Stop the relay and return what it published while running.
    pub async fn stop(mut self) -> DrainReport {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap_or_default()
    }
}
